//! Shared fixtures for the integration suites: a scripted in-process backend and
//! a controller wired to it.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{json, Value};

use console_session::storage::MemoryArea;
use console_session::transport::{ApiRequest, ApiResponse, HttpBackend};
use console_session::{ConsoleConfig, ConsoleResult, HistoryNavigator, SessionController};

pub type Handler = Box<dyn Fn(&ApiRequest) -> ConsoleResult<ApiResponse> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
}

/// Answers every request from `handler`, optionally after a (virtual-time) delay.
pub struct ScriptedBackend {
    handler: Mutex<Arc<Handler>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ApiRequest) -> ConsoleResult<ApiResponse> + Send + Sync + 'static,
    {
        let handler: Handler = Box::new(handler);
        Self { handler: Mutex::new(Arc::new(handler)), delay: Mutex::new(None), calls: Mutex::new(Vec::new()) }
    }

    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&ApiRequest) -> ConsoleResult<ApiResponse> + Send + Sync + 'static,
    {
        let handler: Handler = Box::new(handler);
        *self.handler.lock() = Arc::new(handler);
    }

    pub fn set_delay(&self, delay: Option<Duration>) { *self.delay.lock() = delay; }

    pub fn calls(&self) -> Vec<RecordedCall> { self.calls.lock().clone() }

    pub fn calls_to(&self, path: &str) -> usize { self.calls.lock().iter().filter(|c| c.path == path).count() }

    pub fn reset_calls(&self) { self.calls.lock().clear(); }
}

impl HttpBackend for ScriptedBackend {
    fn execute<'a>(&'a self, req: &'a ApiRequest) -> BoxFuture<'a, ConsoleResult<ApiResponse>> {
        self.calls.lock().push(RecordedCall {
            method: req.method.to_string(),
            path: req.path.clone(),
            authorization: req.header("authorization").map(str::to_string),
        });
        // Snapshot the handler at dispatch so a later swap only affects later requests.
        let handler = self.handler.lock().clone();
        let delay = *self.delay.lock();
        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            (**handler)(req)
        })
    }
}

pub fn user_json(id: &str, email: &str, role: &str, org: Option<&str>) -> Value {
    json!({
        "id": id,
        "email": email,
        "name": "Ada Admin",
        "role": role,
        "organizationId": org,
        "organizationName": org.map(|o| format!("{o} Ltd")),
        "organizationBusinessType": org.map(|_| "retail"),
    })
}

pub fn bearer(req: &ApiRequest) -> Option<&str> {
    req.header("authorization").and_then(|v| v.strip_prefix("Bearer "))
}

/// A small backend: three accounts, identity and organization settings per token.
///
/// - `a@x.com` / `secret` gets token `t1`, ORG_ADMIN of `org-1`
/// - `root@x.com` / `secret` gets token `t2`, SUPER_ADMIN without an organization
/// - `staff@x.com` / `secret` gets token `t3`, STAFF of `org-2`
pub fn standard_handler(req: &ApiRequest) -> ConsoleResult<ApiResponse> {
    match req.path.as_str() {
        "/auth/login" => {
            let body = req.body.clone().unwrap_or(Value::Null);
            let email = body.get("email").and_then(Value::as_str).unwrap_or_default();
            let password = body.get("password").and_then(Value::as_str).unwrap_or_default();
            match (email, password) {
                ("a@x.com", "secret") => Ok(ApiResponse::new(200, json!({ "token": "t1", "user": user_json("1", "a@x.com", "ORG_ADMIN", Some("org-1")) }))),
                ("root@x.com", "secret") => Ok(ApiResponse::new(200, json!({ "token": "t2", "user": user_json("2", "root@x.com", "SUPER_ADMIN", None) }))),
                ("staff@x.com", "secret") => Ok(ApiResponse::new(200, json!({ "token": "t3", "user": user_json("3", "staff@x.com", "STAFF", Some("org-2")) }))),
                _ => Ok(ApiResponse::new(401, json!({ "message": "Invalid credentials" }))),
            }
        }
        "/auth/me" => match bearer(req) {
            Some("t1") => Ok(ApiResponse::new(200, user_json("1", "a@x.com", "ORG_ADMIN", Some("org-1")))),
            Some("t2") => Ok(ApiResponse::new(200, user_json("2", "root@x.com", "SUPER_ADMIN", None))),
            Some("t3") => Ok(ApiResponse::new(200, user_json("3", "staff@x.com", "STAFF", Some("org-2")))),
            _ => Ok(ApiResponse::new(401, json!({ "message": "Unauthorized" }))),
        },
        "/org/config" => match bearer(req) {
            Some("t1") => Ok(ApiResponse::new(200, json!({ "organizationId": "org-1", "name": "org-1 Ltd", "businessType": "retail", "currency": "EUR" }))),
            Some("t3") => Ok(ApiResponse::new(200, json!({ "organizationId": "org-2", "name": "org-2 Ltd", "businessType": "clinic", "currency": "USD" }))),
            Some(_) => Ok(ApiResponse::new(404, json!({ "message": "no organization" }))),
            None => Ok(ApiResponse::new(401, json!({ "message": "Unauthorized" }))),
        },
        _ => Ok(ApiResponse::new(404, json!({ "error": "not found" }))),
    }
}

pub struct Harness {
    pub controller: SessionController,
    pub backend: Arc<ScriptedBackend>,
    pub navigator: Arc<HistoryNavigator>,
    /// Shares state with the controller's area; a second "tab" can write through it.
    pub area: MemoryArea,
}

pub fn harness() -> Harness { harness_with(ConsoleConfig::default(), ScriptedBackend::new(standard_handler)) }

pub fn harness_with(config: ConsoleConfig, backend: ScriptedBackend) -> Harness {
    let area = MemoryArea::new();
    let backend = Arc::new(backend);
    let navigator = Arc::new(HistoryNavigator::starting_at("/login"));
    let controller = SessionController::new(&config, Arc::new(area.clone()), backend.clone(), navigator.clone());
    Harness { controller, backend, navigator, area }
}
