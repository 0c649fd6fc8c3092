//! # Actors
//!
//! Who performed an operation. Every ledger entry records an [`Actor`];
//! entries written by the enforcement evaluator use [`Actor::system`].

use serde::{Deserialize, Serialize};

use crate::identity::UserId;

/// The role an actor holds for the operation being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// A property owner.
    Owner,
    /// A guest holding (or accepting) a stay.
    Guest,
    /// The enforcement evaluator or another internal process.
    System,
}

impl ActorRole {
    /// Lowercase role name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Guest => "guest",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and request context of whoever triggered an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Role for this operation.
    pub role: ActorRole,
    /// Account id. `None` for system actors.
    pub user_id: Option<UserId>,
    /// Account email, when known.
    pub email: Option<String>,
    /// Client IP address, when the call came over the network.
    pub ip_address: Option<String>,
    /// Client user agent, when the call came over the network.
    pub user_agent: Option<String>,
}

impl Actor {
    /// An owner acting on their own properties.
    pub fn owner(user_id: UserId) -> Self {
        Self::user(ActorRole::Owner, user_id)
    }

    /// A guest acting on their own stays.
    pub fn guest(user_id: UserId) -> Self {
        Self::user(ActorRole::Guest, user_id)
    }

    /// The enforcement evaluator.
    pub fn system() -> Self {
        Self {
            role: ActorRole::System,
            user_id: None,
            email: None,
            ip_address: None,
            user_agent: None,
        }
    }

    fn user(role: ActorRole, user_id: UserId) -> Self {
        Self {
            role,
            user_id: Some(user_id),
            email: None,
            ip_address: None,
            user_agent: None,
        }
    }

    /// Attach an email address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Attach network request context.
    pub fn with_request_context(
        mut self,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    /// Short label for log lines and audit messages, e.g. `owner:3f2a…`.
    pub fn label(&self) -> String {
        match (&self.user_id, &self.email) {
            (_, Some(email)) => format!("{}:{email}", self.role),
            (Some(id), None) => format!("{}:{id}", self.role),
            (None, None) => self.role.to_string(),
        }
    }
}
