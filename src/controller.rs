//! Session controller: the only writer of the durable session store and the only
//! component allowed to evict the derived caches.
//!
//! Ordering inside `login` and teardown is fixed: the store write completes first,
//! then the caches are seeded or evicted, then the session event goes out, and
//! navigation fires last. Anything reacting to navigation sees a consistent store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::{ConfigDomain, EntryState, IdentityCache, IdentityState, OrgConfig, ScopedConfigCache};
use crate::config::ConsoleConfig;
use crate::error::{ConsoleError, ConsoleResult};
use crate::guard::{GuardDecision, GuardInput, RouteGuard};
use crate::identity::{DurableSessionStore, Session, UserSnapshot};
use crate::navigation::{NavigationMode, Navigator, Routes};
use crate::storage::{FileArea, KeyValueArea, MemoryArea};
use crate::transport::{ApiRequest, BearerAuth, HttpBackend, ReqwestBackend, SessionSource, TeardownHandle, Transport, UnauthorizedTeardown};

pub const LOGIN_PATH: &str = "/auth/login";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { user_id: String },
    LoggedOut,
    /// Torn down by a 401.
    Expired,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
    user: UserSnapshot,
}

struct SessionCore {
    store: DurableSessionStore,
    identity: IdentityCache,
    configs: ScopedConfigCache,
    navigator: Arc<dyn Navigator>,
    routes: Routes,
    generation: AtomicU64,
    /// Token the caches were filled under. Also serializes session transitions.
    bound_token: Mutex<Option<String>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionCore {
    fn generation(&self) -> u64 { self.generation.load(Ordering::SeqCst) }

    fn establish(&self, token: &str, user: &UserSnapshot) {
        {
            let mut bound = self.bound_token.lock();
            if let Err(e) = self.store.save(token, user) {
                warn!(target: "console::session", "session saved in memory only: {}", e);
            }
            *bound = Some(token.to_string());
            self.generation.fetch_add(1, Ordering::SeqCst);
            // Whatever the previous session cached must not leak into this one.
            self.identity.evict();
            self.configs.evict_all();
            self.identity.seed(user.clone());
        }
        info!(target: "console::session", user_id = %user.id, role = %user.role, org = ?user.organization_id, "logged in");
        let _ = self.events.send(SessionEvent::LoggedIn { user_id: user.id.clone() });
        self.navigator.navigate(&self.routes.landing, NavigationMode::Push);
    }

    /// Clear the store and every cache, then send the user to the login surface.
    /// With `expected_generation` set (401 path) this is a no-op unless that
    /// generation is current and a token is still stored.
    fn teardown(&self, expected_generation: Option<u64>) -> bool {
        {
            let mut bound = self.bound_token.lock();
            if let Some(generation) = expected_generation {
                if generation != self.generation() {
                    debug!(target: "console::session", generation, current = self.generation(), "ignoring 401 from an earlier session");
                    return false;
                }
                if !self.store.has_token() {
                    debug!(target: "console::session", "teardown already done");
                    return false;
                }
            }
            if let Err(e) = self.store.clear() {
                warn!(target: "console::session", "session cleared in memory only: {}", e);
            }
            *bound = None;
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.identity.evict();
            self.configs.evict_all();
        }
        // Navigation runs outside the lock so a host may call back into the controller.
        let event = if expected_generation.is_some() { SessionEvent::Expired } else { SessionEvent::LoggedOut };
        info!(target: "console::session", ?event, "session torn down");
        let _ = self.events.send(event);
        self.navigator.navigate(&self.routes.login, NavigationMode::Replace);
        true
    }

    /// Drop everything cached under a token that is no longer the stored one.
    /// Another holder of the same area may have logged out or logged in as a
    /// different user. No navigation: the next guard decision handles that.
    fn reconcile(&self) {
        let mut bound = self.bound_token.lock();
        let stored = self.store.token();
        if *bound == stored {
            return;
        }
        if bound.is_some() {
            info!(target: "console::session", signed_in = stored.is_some(), "stored session changed elsewhere; dropping cached identity and config");
        }
        *bound = stored;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.identity.evict();
        self.configs.evict_all();
    }
}

impl SessionSource for SessionCore {
    fn token(&self) -> Option<String> { self.store.token() }

    fn generation(&self) -> u64 { SessionCore::generation(self) }
}

impl TeardownHandle for SessionCore {
    fn expire(&self, generation: u64) -> bool { self.teardown(Some(generation)) }
}

#[derive(Clone)]
pub struct SessionController {
    core: Arc<SessionCore>,
    transport: Transport,
    org_domain: ConfigDomain,
}

impl SessionController {
    pub fn new(config: &ConsoleConfig, area: Arc<dyn KeyValueArea>, backend: Arc<dyn HttpBackend>, navigator: Arc<dyn Navigator>) -> Self {
        let (events, _) = broadcast::channel(64);
        let store = DurableSessionStore::new(area, &config.storage_prefix);
        let bound_token = Mutex::new(store.token());
        let core = Arc::new(SessionCore {
            store,
            identity: IdentityCache::new(config.identity_stale_after()),
            configs: ScopedConfigCache::new(config.retry_policy()),
            navigator,
            routes: config.routes(),
            generation: AtomicU64::new(0),
            bound_token,
            events,
        });
        let transport = Transport::new(backend)
            .with_request_middleware(Arc::new(BearerAuth::new(core.clone())))
            .with_response_middleware(Arc::new(UnauthorizedTeardown::new(core.clone())));
        Self { core, transport, org_domain: ConfigDomain::organization(config.config_ttl()) }
    }

    /// Build the production stack: a file-backed area when `session_file` is set
    /// and a reqwest backend pointed at `api_base_url`.
    pub fn from_config(config: &ConsoleConfig, navigator: Arc<dyn Navigator>) -> ConsoleResult<Self> {
        let area: Arc<dyn KeyValueArea> = match &config.session_file {
            Some(path) => Arc::new(FileArea::open(path)?),
            None => Arc::new(MemoryArea::new()),
        };
        let backend = Arc::new(ReqwestBackend::new(&config.api_base_url, config.request_timeout())?);
        Ok(Self::new(config, area, backend, navigator))
    }

    /// Authenticate against the backend. On failure nothing about the session changes.
    pub async fn login(&self, email: &str, password: &str) -> ConsoleResult<UserSnapshot> {
        let req = ApiRequest::post(LOGIN_PATH, json!({ "email": email, "password": password })).unauthenticated();
        let resp = match self.transport.send(req).await {
            Ok(resp) => resp,
            Err(ConsoleError::Http { status: 400 | 401 | 403, message }) => {
                info!(target: "console::session", "login rejected");
                return Err(ConsoleError::Credentials { message });
            }
            Err(e) => return Err(e),
        };
        let body: LoginResponse = resp.json()?;
        if body.token.is_empty() {
            return Err(ConsoleError::decode("login response carried an empty token"));
        }
        self.core.establish(&body.token, &body.user);
        Ok(body.user)
    }

    /// Tear down the session, evict every cache and go to the login surface.
    /// Safe without a session.
    pub fn logout(&self) { self.core.teardown(None); }

    /// True iff a token is stored right now. Never waits on the identity cache.
    pub fn is_authenticated(&self) -> bool { self.core.store.has_token() }

    pub fn session(&self) -> Session { self.core.store.load() }

    pub fn generation(&self) -> u64 { self.core.generation() }

    pub fn routes(&self) -> &Routes { &self.core.routes }

    pub fn transport(&self) -> &Transport { &self.transport }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> { self.core.events.subscribe() }

    pub fn identity_cache(&self) -> &IdentityCache { &self.core.identity }

    pub fn config_cache(&self) -> &ScopedConfigCache { &self.core.configs }

    /// Current identity entry without triggering a fetch.
    pub fn identity_state(&self) -> IdentityState { self.core.identity.state() }

    pub fn current_user(&self) -> Option<UserSnapshot> {
        self.core.reconcile();
        if !self.is_authenticated() {
            return None;
        }
        self.core.identity.current_user()
    }

    pub async fn identity(&self) -> IdentityState {
        self.core.reconcile();
        self.core.identity.resolve(&self.core.store, &self.transport).await
    }

    pub async fn config(&self, domain: &ConfigDomain) -> EntryState<Value> {
        self.core.reconcile();
        self.core.configs.read(domain, &self.core.store, &self.transport).await
    }

    pub fn organization_domain(&self) -> &ConfigDomain { &self.org_domain }

    pub async fn organization_config(&self) -> ConsoleResult<Option<OrgConfig>> {
        self.core.reconcile();
        self.core.configs.read_as(&self.org_domain, &self.core.store, &self.transport).await
    }

    /// Decide from the current snapshot only.
    pub fn decide(&self, guard: &dyn RouteGuard) -> GuardDecision {
        self.core.reconcile();
        let identity = self.identity_state();
        guard.decide(&GuardInput { identity: &identity, has_token: self.is_authenticated(), routes: &self.core.routes })
    }

    /// Resolve identity if needed, then decide.
    pub async fn check(&self, guard: &dyn RouteGuard) -> GuardDecision {
        let identity = self.identity().await;
        let decision = guard.decide(&GuardInput { identity: &identity, has_token: self.is_authenticated(), routes: &self.core.routes });
        debug!(target: "console::guard", state = ?decision.state(), "guard decided");
        decision
    }
}

static GLOBAL: OnceCell<SessionController> = OnceCell::new();

/// Install the process-wide controller. Fails, returning it back, if one is already installed.
pub fn install_global(controller: SessionController) -> Result<(), SessionController> { GLOBAL.set(controller) }

pub fn global() -> Option<&'static SessionController> { GLOBAL.get() }
