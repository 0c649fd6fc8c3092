//! # HTTP Middleware
//!
//! Request counters. Tracing uses `tower_http::trace::TraceLayer` directly.

pub mod metrics;
