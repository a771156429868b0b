use std::sync::Arc;

use tracing::{debug, info};

use super::{ApiRequest, ApiResponse, RequestContext};
use crate::error::{ConsoleError, ConsoleResult};

pub trait RequestMiddleware: Send + Sync {
    fn on_request(&self, ctx: &mut RequestContext, req: &mut ApiRequest);
}

pub trait ResponseMiddleware: Send + Sync {
    fn on_response(&self, ctx: &RequestContext, result: ConsoleResult<ApiResponse>) -> ConsoleResult<ApiResponse>;
}

impl<F> RequestMiddleware for F
where
    F: Fn(&mut RequestContext, &mut ApiRequest) + Send + Sync,
{
    fn on_request(&self, ctx: &mut RequestContext, req: &mut ApiRequest) { self(ctx, req) }
}

impl<F> ResponseMiddleware for F
where
    F: Fn(&RequestContext, ConsoleResult<ApiResponse>) -> ConsoleResult<ApiResponse> + Send + Sync,
{
    fn on_response(&self, ctx: &RequestContext, result: ConsoleResult<ApiResponse>) -> ConsoleResult<ApiResponse> {
        self(ctx, result)
    }
}

/// Read-only view of the current session used at dispatch time.
pub trait SessionSource: Send + Sync {
    fn token(&self) -> Option<String>;
    fn generation(&self) -> u64;
}

/// Global teardown triggered by an expired session.
pub trait TeardownHandle: Send + Sync {
    /// Tear the session down if `generation` is still current and a token is
    /// present. Returns whether anything was torn down; repeated calls are no-ops.
    fn expire(&self, generation: u64) -> bool;
}

/// Attaches `Authorization: Bearer <token>` when a token is stored. Without a
/// token, or for endpoints marked unauthenticated, the request goes out bare.
pub struct BearerAuth {
    source: Arc<dyn SessionSource>,
}

impl BearerAuth {
    pub fn new(source: Arc<dyn SessionSource>) -> Self { Self { source } }
}

impl RequestMiddleware for BearerAuth {
    fn on_request(&self, ctx: &mut RequestContext, req: &mut ApiRequest) {
        ctx.generation = self.source.generation();
        if req.unauthenticated_endpoint {
            return;
        }
        if let Some(token) = self.source.token() {
            req.set_header("authorization", format!("Bearer {token}"));
        } else {
            debug!(target: "console::transport", request_id = %ctx.request_id, "no token; sending unauthenticated");
        }
    }
}

/// On a 401 from an authenticated endpoint, tears the session down before the
/// original error reaches the caller. The failed request is never retried.
pub struct UnauthorizedTeardown {
    handle: Arc<dyn TeardownHandle>,
}

impl UnauthorizedTeardown {
    pub fn new(handle: Arc<dyn TeardownHandle>) -> Self { Self { handle } }
}

impl ResponseMiddleware for UnauthorizedTeardown {
    fn on_response(&self, ctx: &RequestContext, result: ConsoleResult<ApiResponse>) -> ConsoleResult<ApiResponse> {
        if let Err(ConsoleError::Unauthorized) = &result {
            if self.handle.expire(ctx.generation) {
                info!(target: "console::transport", request_id = %ctx.request_id, "401 on {} {}; session torn down", ctx.method, ctx.path);
            }
        }
        result
    }
}
