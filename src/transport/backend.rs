use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use serde_json::Value;

use super::{ApiRequest, ApiResponse};
use crate::error::{ConsoleError, ConsoleResult};

/// Raw wire access. Implementations report every HTTP status as `Ok`; only
/// failures to get a response at all are `Err`.
pub trait HttpBackend: Send + Sync {
    fn execute<'a>(&'a self, req: &'a ApiRequest) -> BoxFuture<'a, ConsoleResult<ApiResponse>>;
}

#[derive(Clone)]
pub struct ReqwestBackend {
    base: Url,
    client: reqwest::Client,
}

impl ReqwestBackend {
    pub fn new(base: &str, timeout: Duration) -> ConsoleResult<Self> {
        let base = Url::parse(base).map_err(|e| ConsoleError::transport(format!("invalid base URL '{}': {}", base, e)))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base, client })
    }

    pub fn base(&self) -> &Url { &self.base }

    /// Append `path` to the base URL, keeping any path prefix the base carries (`/api`).
    fn url_for(&self, path: &str) -> ConsoleResult<Url> {
        let joined = format!("{}/{}", self.base.as_str().trim_end_matches('/'), path.trim_start_matches('/'));
        Url::parse(&joined).map_err(|e| ConsoleError::transport(format!("invalid request URL '{}': {}", joined, e)))
    }

    async fn run(&self, req: &ApiRequest) -> ConsoleResult<ApiResponse> {
        let url = self.url_for(&req.path)?;
        let mut headers = HeaderMap::new();
        for (k, v) in &req.headers {
            let name = HeaderName::from_bytes(k.as_bytes()).map_err(|e| ConsoleError::transport(format!("invalid header name '{}': {}", k, e)))?;
            let value = HeaderValue::from_str(v).map_err(|e| ConsoleError::transport(format!("invalid header value for '{}': {}", k, e)))?;
            headers.insert(name, value);
        }
        let mut builder = self.client.request(req.method.clone(), url).headers(headers);
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        Ok(ApiResponse { status, body })
    }
}

impl HttpBackend for ReqwestBackend {
    fn execute<'a>(&'a self, req: &'a ApiRequest) -> BoxFuture<'a, ConsoleResult<ApiResponse>> { Box::pin(self.run(req)) }
}
