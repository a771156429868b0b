use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use super::principal::UserSnapshot;
use crate::error::ConsoleResult;
use crate::storage::{AreaOp, KeyValueArea};

pub type SessionToken = String;

/// Authenticated-identity state for the current origin. `user` only counts
/// while `token` is present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub token: Option<SessionToken>,
    pub user: Option<UserSnapshot>,
}

impl Session {
    pub fn empty() -> Self { Self::default() }

    pub fn is_authenticated(&self) -> bool { self.token.is_some() }
}

/// Token and last-known user kept in a persistent area under `<prefix>.token`
/// and `<prefix>.user`. All operations are synchronous and never touch the network.
#[derive(Clone)]
pub struct DurableSessionStore {
    area: Arc<dyn KeyValueArea>,
    token_key: String,
    user_key: String,
    saved_at_key: String,
}

impl DurableSessionStore {
    pub fn new(area: Arc<dyn KeyValueArea>, prefix: &str) -> Self {
        Self {
            area,
            token_key: format!("{prefix}.token"),
            user_key: format!("{prefix}.user"),
            saved_at_key: format!("{prefix}.saved_at"),
        }
    }

    /// Write token and user as one batch.
    pub fn save(&self, token: &str, user: &UserSnapshot) -> ConsoleResult<()> {
        let user_json = serde_json::to_string(user)?;
        self.area.apply(vec![
            AreaOp::Set(self.token_key.clone(), token.to_string()),
            AreaOp::Set(self.user_key.clone(), user_json),
            AreaOp::Set(self.saved_at_key.clone(), Utc::now().to_rfc3339()),
        ])
    }

    pub fn load(&self) -> Session {
        let token = self.token();
        let raw_user = self.area.get(&self.user_key);
        let Some(token) = token else {
            if raw_user.is_some() {
                warn!(target: "console::session", "user snapshot present without token; treating session as empty");
            }
            return Session::empty();
        };
        let user = raw_user.and_then(|raw| match serde_json::from_str::<UserSnapshot>(&raw) {
            Ok(u) => Some(u),
            Err(e) => {
                warn!(target: "console::session", "discarding unreadable user snapshot: {}", e);
                None
            }
        });
        Session { token: Some(token), user }
    }

    /// Remove token and user together. Never clear one field on its own.
    pub fn clear(&self) -> ConsoleResult<()> {
        self.area.apply(vec![
            AreaOp::Remove(self.token_key.clone()),
            AreaOp::Remove(self.user_key.clone()),
            AreaOp::Remove(self.saved_at_key.clone()),
        ])
    }

    pub fn token(&self) -> Option<SessionToken> {
        self.area.get(&self.token_key).filter(|t| !t.is_empty())
    }

    pub fn has_token(&self) -> bool { self.token().is_some() }

    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.area.get(&self.saved_at_key)?;
        DateTime::parse_from_rfc3339(&raw).ok().map(|d| d.with_timezone(&Utc))
    }
}
