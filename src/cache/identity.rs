use std::time::Duration;

use tokio::sync::broadcast;
use tracing::debug;

use super::{CacheEvent, EntryState, QueryCache};
use crate::identity::{DurableSessionStore, UserSnapshot};
use crate::transport::Transport;

pub const IDENTITY_KEY: &str = "auth/me";
pub const ME_PATH: &str = "/auth/me";

pub type IdentityState = EntryState<UserSnapshot>;

/// "Who am I", shared by every consumer. One entry per session.
#[derive(Clone)]
pub struct IdentityCache {
    cache: QueryCache<&'static str, UserSnapshot>,
    stale_after: Option<Duration>,
}

impl IdentityCache {
    pub fn new(stale_after: Option<Duration>) -> Self {
        Self { cache: QueryCache::new("identity"), stale_after }
    }

    pub fn state(&self) -> IdentityState { self.cache.peek(&IDENTITY_KEY) }

    pub fn current_user(&self) -> Option<UserSnapshot> { self.state().into_ready() }

    pub fn is_in_flight(&self) -> bool { self.cache.is_in_flight(&IDENTITY_KEY) }

    pub fn epoch(&self) -> u64 { self.cache.epoch() }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent<&'static str>> { self.cache.subscribe() }

    /// Resolve the identity. Without a stored token this settles on `Absent`
    /// without touching the network; otherwise it shares the single in-flight
    /// `/auth/me` request with every other caller.
    pub async fn resolve(&self, store: &DurableSessionStore, transport: &Transport) -> IdentityState {
        if !store.has_token() {
            debug!(target: "console::cache", "identity: no token, skipping fetch");
            return EntryState::Absent;
        }
        self.cache
            .fetch(IDENTITY_KEY, self.stale_after, || transport.get_json::<UserSnapshot>(ME_PATH))
            .await
    }

    /// Force the next `resolve` to hit the backend while keeping the current user visible.
    pub fn invalidate(&self) { self.cache.invalidate(&IDENTITY_KEY) }

    pub(crate) fn seed(&self, user: UserSnapshot) { self.cache.seed(IDENTITY_KEY, user) }

    pub(crate) fn evict(&self) { self.cache.clear() }
}
