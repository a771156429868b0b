//! Single outbound HTTP client shared by every API call.
//!
//! A [`Transport`] wraps one [`HttpBackend`] with two middleware chains: request
//! middleware runs before dispatch (bearer injection), response middleware runs on
//! every outcome (401 teardown). The backend itself only reports what came back over
//! the wire; turning statuses into [`ConsoleError`]s happens here, before the
//! response chain sees the result.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{ConsoleError, ConsoleResult};

mod backend;
pub mod middleware;

pub use backend::{HttpBackend, ReqwestBackend};
pub use middleware::{BearerAuth, RequestMiddleware, ResponseMiddleware, SessionSource, TeardownHandle, UnauthorizedTeardown};
pub use reqwest::Method;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base, e.g. `/auth/me`.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    /// A 401 from this endpoint means "bad credentials", not "session expired".
    pub unauthenticated_endpoint: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), headers: Vec::new(), body: None, unauthenticated_endpoint: false }
    }

    pub fn get(path: impl Into<String>) -> Self { Self::new(Method::GET, path) }

    pub fn post(path: impl Into<String>, body: Value) -> Self { Self::new(Method::POST, path).with_body(body) }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn unauthenticated(mut self) -> Self {
        self.unauthenticated_endpoint = true;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self { Self { status, body } }

    pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }

    pub fn json<T: DeserializeOwned>(&self) -> ConsoleResult<T> { Ok(serde_json::from_value(self.body.clone())?) }

    /// Best human-readable message the backend gave us.
    pub fn error_message(&self) -> String {
        for field in ["message", "error", "detail"] {
            match self.body.get(field) {
                Some(Value::String(s)) if !s.is_empty() => return s.clone(),
                Some(Value::Array(items)) if !items.is_empty() => {
                    return items.iter().map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())).collect::<Vec<_>>().join("; ");
                }
                _ => {}
            }
        }
        match &self.body {
            Value::String(s) if !s.is_empty() => s.clone(),
            _ => format!("request failed with status {}", self.status),
        }
    }
}

/// Per-dispatch facts shared by both middleware chains.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    pub path: String,
    /// Session generation observed when the request left.
    pub generation: u64,
    pub unauthenticated_endpoint: bool,
}

#[derive(Clone)]
pub struct Transport {
    backend: Arc<dyn HttpBackend>,
    request_chain: Vec<Arc<dyn RequestMiddleware>>,
    response_chain: Vec<Arc<dyn ResponseMiddleware>>,
}

impl Transport {
    pub fn new(backend: Arc<dyn HttpBackend>) -> Self {
        Self { backend, request_chain: Vec::new(), response_chain: Vec::new() }
    }

    pub fn with_request_middleware(mut self, mw: Arc<dyn RequestMiddleware>) -> Self {
        self.request_chain.push(mw);
        self
    }

    pub fn with_response_middleware(mut self, mw: Arc<dyn ResponseMiddleware>) -> Self {
        self.response_chain.push(mw);
        self
    }

    pub async fn send(&self, mut req: ApiRequest) -> ConsoleResult<ApiResponse> {
        let request_id = uuid::Uuid::new_v4().to_string();
        req.set_header(REQUEST_ID_HEADER, request_id.clone());
        let mut ctx = RequestContext {
            request_id,
            method: req.method.clone(),
            path: req.path.clone(),
            generation: 0,
            unauthenticated_endpoint: req.unauthenticated_endpoint,
        };
        for mw in &self.request_chain {
            mw.on_request(&mut ctx, &mut req);
        }
        debug!(target: "console::transport", request_id = %ctx.request_id, "{} {} dispatch", ctx.method, ctx.path);

        let mut result = self.backend.execute(&req).await.and_then(|resp| classify(&ctx, resp));
        match &result {
            Ok(resp) => debug!(target: "console::transport", request_id = %ctx.request_id, status = resp.status, "{} {} ok", ctx.method, ctx.path),
            Err(e) => debug!(target: "console::transport", request_id = %ctx.request_id, error = %e, "{} {} failed", ctx.method, ctx.path),
        }
        for mw in &self.response_chain {
            result = mw.on_response(&ctx, result);
        }
        result
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ConsoleResult<T> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    pub async fn post_json<T: DeserializeOwned>(&self, path: &str, body: Value) -> ConsoleResult<T> {
        self.send(ApiRequest::post(path, body)).await?.json()
    }
}

fn classify(ctx: &RequestContext, resp: ApiResponse) -> ConsoleResult<ApiResponse> {
    if resp.is_success() {
        return Ok(resp);
    }
    if resp.status == 401 && !ctx.unauthenticated_endpoint {
        return Err(ConsoleError::Unauthorized);
    }
    Err(ConsoleError::http(resp.status, resp.error_message()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(unauthenticated_endpoint: bool) -> RequestContext {
        RequestContext {
            request_id: "r".into(),
            method: Method::GET,
            path: "/x".into(),
            generation: 0,
            unauthenticated_endpoint,
        }
    }

    #[test]
    fn classify_statuses() {
        assert!(classify(&ctx(false), ApiResponse::new(204, Value::Null)).is_ok());
        assert_eq!(classify(&ctx(false), ApiResponse::new(401, Value::Null)), Err(ConsoleError::Unauthorized));
        assert_eq!(
            classify(&ctx(true), ApiResponse::new(401, json!({"message": "Invalid credentials"}))),
            Err(ConsoleError::http(401, "Invalid credentials"))
        );
        assert_eq!(
            classify(&ctx(false), ApiResponse::new(503, Value::Null)),
            Err(ConsoleError::http(503, "request failed with status 503"))
        );
    }

    #[test]
    fn error_message_shapes() {
        assert_eq!(ApiResponse::new(400, json!({"message": ["email must be an email", "password too short"]})).error_message(), "email must be an email; password too short");
        assert_eq!(ApiResponse::new(400, json!({"error": "Bad Request"})).error_message(), "Bad Request");
        assert_eq!(ApiResponse::new(500, json!("plain text")).error_message(), "plain text");
    }

    #[test]
    fn headers_are_case_insensitive_and_replaced() {
        let mut req = ApiRequest::get("/auth/me");
        req.set_header("Authorization", "Bearer a");
        req.set_header("authorization", "Bearer b");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header("AUTHORIZATION"), Some("Bearer b"));
    }
}
