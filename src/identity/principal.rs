use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use crate::error::ConsoleError;

/// Closed set of console roles. Anything else coming from the backend is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    SuperAdmin,
    OrgAdmin,
    Staff,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::SuperAdmin, Role::OrgAdmin, Role::Staff];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::OrgAdmin => "ORG_ADMIN",
            Role::Staff => "STAFF",
        }
    }

    pub fn is_administrative(&self) -> bool { matches!(self, Role::SuperAdmin | Role::OrgAdmin) }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Role {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUPER_ADMIN" => Ok(Role::SuperAdmin),
            "ORG_ADMIN" => Ok(Role::OrgAdmin),
            "STAFF" => Ok(Role::Staff),
            other => {
                // Lowercase "admin" shows up in older role checks but never in the data model.
                if other.eq_ignore_ascii_case("admin") {
                    warn!(target: "console::identity", "suspect legacy role string '{}' rejected", other);
                }
                Err(ConsoleError::decode(format!("unknown role '{}'", other)))
            }
        }
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// The user as last reported by the backend. Never mutated locally; replaced
/// wholesale on re-fetch or re-login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub organization_name: Option<String>,
    #[serde(default)]
    pub organization_business_type: Option<String>,
}

impl UserSnapshot {
    /// Tenant the user belongs to. Super admins may have none.
    pub fn tenant(&self) -> Option<&str> { self.organization_id.as_deref() }
}

fn id_from_string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid user id: {}", other))),
    }
}
