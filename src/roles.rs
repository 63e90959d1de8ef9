use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Supplier,
    Buyer,
    Auditor,
    Admin,
    /// Scheduled jobs such as the expiry sweep.
    System,
}

impl FromStr for Role {
    type Err = ();

    fn from_str(input: &str) -> Result<Role, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "supplier" => Ok(Role::Supplier),
            "buyer" => Ok(Role::Buyer),
            "auditor" => Ok(Role::Auditor),
            "admin" => Ok(Role::Admin),
            "system" => Ok(Role::System),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Supplier => "supplier",
            Role::Buyer => "buyer",
            Role::Auditor => "auditor",
            Role::Admin => "admin",
            Role::System => "system",
        };
        f.write_str(s)
    }
}

/// The authenticated party behind a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn supplier(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Supplier)
    }

    pub fn auditor(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Auditor)
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Admin)
    }

    pub fn buyer(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Buyer)
    }

    pub fn system() -> Self {
        Self::new("system", Role::System)
    }

    /// Auditor or Admin: may claim and decide reports.
    pub fn has_review_capability(&self) -> bool {
        matches!(self.role, Role::Auditor | Role::Admin)
    }
}
