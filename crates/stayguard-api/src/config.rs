//! # Runtime Configuration
//!
//! Environment-driven settings for the API binary. Every variable is
//! optional; a variable that is set but malformed is a startup error rather
//! than a silent fallback to the default.

use std::time::Duration;

use thiserror::Error;

use stayguard_agentic::{CronSchedule, SchedulePattern};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// How often the Dead Man's Switch evaluator runs on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementCadence {
    Daily,
    Hourly,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Application configuration.
///
/// Custom `Debug` redacts the auth token and the database URL, which
/// usually carries a password.
#[derive(Clone)]
pub struct AppConfig {
    pub port: u16,
    pub auth_token: Option<String>,
    pub database_url: Option<String>,
    pub enforcement_cadence: EnforcementCadence,
    /// How often the runner checks whether its schedule is due.
    pub enforcement_tick: Duration,
    pub notify_webhook_url: Option<url::Url>,
    pub notify_max_attempts: u32,
    /// Refuse invitations the classifier rates `CRITICAL`.
    pub block_critical_invitations: bool,
    pub log_format: LogFormat,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("enforcement_cadence", &self.enforcement_cadence)
            .field("enforcement_tick", &self.enforcement_tick)
            .field("notify_webhook_url", &self.notify_webhook_url.as_ref().map(|u| u.as_str()))
            .field("notify_max_attempts", &self.notify_max_attempts)
            .field("block_critical_invitations", &self.block_critical_invitations)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_token: None,
            database_url: None,
            enforcement_cadence: EnforcementCadence::Daily,
            enforcement_tick: Duration::from_secs(60),
            notify_webhook_url: None,
            notify_max_attempts: 3,
            block_critical_invitations: false,
            log_format: LogFormat::Text,
        }
    }
}

impl AppConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let port = match get("PORT") {
            Some(v) => parse_number::<u16>("PORT", &v)?,
            None => defaults.port,
        };

        let enforcement_cadence = match get("ENFORCEMENT_SCHEDULE") {
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "daily" => EnforcementCadence::Daily,
                "hourly" => EnforcementCadence::Hourly,
                "off" => EnforcementCadence::Off,
                _ => return Err(invalid("ENFORCEMENT_SCHEDULE", &v, "expected daily, hourly or off")),
            },
            None => defaults.enforcement_cadence,
        };

        let enforcement_tick = match get("ENFORCEMENT_TICK_SECS") {
            Some(v) => {
                let secs = parse_number::<u64>("ENFORCEMENT_TICK_SECS", &v)?;
                if secs == 0 {
                    return Err(invalid("ENFORCEMENT_TICK_SECS", &v, "must be at least 1"));
                }
                Duration::from_secs(secs)
            }
            None => defaults.enforcement_tick,
        };

        let notify_webhook_url = get("NOTIFY_WEBHOOK_URL")
            .map(|v| {
                url::Url::parse(v.trim()).map_err(|e| invalid("NOTIFY_WEBHOOK_URL", &v, &e.to_string()))
            })
            .transpose()?;

        let notify_max_attempts = match get("NOTIFY_MAX_ATTEMPTS") {
            Some(v) => {
                let n = parse_number::<u32>("NOTIFY_MAX_ATTEMPTS", &v)?;
                if n == 0 {
                    return Err(invalid("NOTIFY_MAX_ATTEMPTS", &v, "must be at least 1"));
                }
                n
            }
            None => defaults.notify_max_attempts,
        };

        let block_critical_invitations = match get("BLOCK_CRITICAL_INVITATIONS") {
            Some(v) => parse_bool("BLOCK_CRITICAL_INVITATIONS", &v)?,
            None => defaults.block_critical_invitations,
        };

        let log_format = match get("LOG_FORMAT") {
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" | "pretty" => LogFormat::Text,
                _ => return Err(invalid("LOG_FORMAT", &v, "expected json or text")),
            },
            None => defaults.log_format,
        };

        Ok(Self {
            port,
            auth_token: get("AUTH_TOKEN"),
            database_url: get("DATABASE_URL"),
            enforcement_cadence,
            enforcement_tick,
            notify_webhook_url,
            notify_max_attempts,
            block_critical_invitations,
            log_format,
        })
    }

    /// The evaluator's schedule, or `None` when periodic enforcement is off.
    pub fn enforcement_schedule(&self) -> Option<CronSchedule> {
        let pattern = match self.enforcement_cadence {
            EnforcementCadence::Daily => SchedulePattern::Daily,
            EnforcementCadence::Hourly => SchedulePattern::Hourly,
            EnforcementCadence::Off => return None,
        };
        Some(CronSchedule::new(
            "dead-mans-switch",
            "Dead Man's Switch enforcement pass",
            pattern,
        ))
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_number<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| invalid(var, value, &e.to_string()))
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(var, value, "expected true or false")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.enforcement_cadence, EnforcementCadence::Daily);
        assert_eq!(cfg.enforcement_tick, Duration::from_secs(60));
        assert_eq!(cfg.notify_max_attempts, 3);
        assert!(!cfg.block_critical_invitations);
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.enforcement_schedule().unwrap().pattern, SchedulePattern::Daily);
    }

    #[test]
    fn reads_every_variable() {
        let cfg = config(&[
            ("PORT", "9000"),
            ("AUTH_TOKEN", "s3cret"),
            ("DATABASE_URL", "postgres://u:p@localhost/stayguard"),
            ("ENFORCEMENT_SCHEDULE", "Hourly"),
            ("ENFORCEMENT_TICK_SECS", "5"),
            ("NOTIFY_WEBHOOK_URL", "https://hooks.example.com/notify"),
            ("NOTIFY_MAX_ATTEMPTS", "5"),
            ("BLOCK_CRITICAL_INVITATIONS", "true"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.auth_token.as_deref(), Some("s3cret"));
        assert_eq!(cfg.enforcement_cadence, EnforcementCadence::Hourly);
        assert_eq!(cfg.enforcement_tick, Duration::from_secs(5));
        assert_eq!(cfg.notify_webhook_url.unwrap().host_str(), Some("hooks.example.com"));
        assert_eq!(cfg.notify_max_attempts, 5);
        assert!(cfg.block_critical_invitations);
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn off_schedule_disables_runner() {
        let cfg = config(&[("ENFORCEMENT_SCHEDULE", "off")]).unwrap();
        assert!(cfg.enforcement_schedule().is_none());
    }

    #[test]
    fn malformed_values_are_errors() {
        for (var, value) in [
            ("PORT", "eighty"),
            ("ENFORCEMENT_SCHEDULE", "weekly"),
            ("ENFORCEMENT_TICK_SECS", "0"),
            ("NOTIFY_WEBHOOK_URL", "not a url"),
            ("NOTIFY_MAX_ATTEMPTS", "0"),
            ("BLOCK_CRITICAL_INVITATIONS", "maybe"),
            ("LOG_FORMAT", "xml"),
        ] {
            let err = config(&[(var, value)]).unwrap_err();
            let ConfigError::Invalid { var: got, .. } = err;
            assert_eq!(got, var);
        }
    }

    #[test]
    fn debug_redacts_secrets() {
        let cfg = config(&[
            ("AUTH_TOKEN", "s3cret"),
            ("DATABASE_URL", "postgres://u:hunter2@db/stayguard"),
        ])
        .unwrap();
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("s3cret"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
