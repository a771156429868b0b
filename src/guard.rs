//! Render-time route guards.
//!
//! A guard never stores its decision: [`RouteGuard::decide`] is a pure function of
//! the identity entry, token presence and the configured routes, and is meant to
//! be called on every render of the guarded tree.

use crate::cache::{EntryState, IdentityState};
use crate::identity::RolePredicate;
use crate::navigation::{NavigationMode, Navigator, Routes};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Identity is still being resolved; show a neutral waiting indicator.
    Pending,
    Redirect { path: String, mode: NavigationMode },
    Render,
}

impl GuardDecision {
    fn redirect(path: &str) -> Self { GuardDecision::Redirect { path: path.to_string(), mode: NavigationMode::Replace } }

    pub fn is_render(&self) -> bool { matches!(self, GuardDecision::Render) }

    pub fn state(&self) -> GuardState { GuardState::from(self) }

    /// Perform the redirect, if any. Returns whether navigation happened.
    pub fn apply(&self, navigator: &dyn Navigator) -> bool {
        match self {
            GuardDecision::Redirect { path, mode } => {
                navigator.navigate(path, *mode);
                true
            }
            GuardDecision::Pending | GuardDecision::Render => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Checking,
    Denied,
    Admitted,
}

impl From<&GuardDecision> for GuardState {
    fn from(d: &GuardDecision) -> Self {
        match d {
            GuardDecision::Pending => GuardState::Checking,
            GuardDecision::Redirect { .. } => GuardState::Denied,
            GuardDecision::Render => GuardState::Admitted,
        }
    }
}

/// Snapshot a guard decides from.
#[derive(Debug, Clone, Copy)]
pub struct GuardInput<'a> {
    pub identity: &'a IdentityState,
    pub has_token: bool,
    pub routes: &'a Routes,
}

pub trait RouteGuard: Send + Sync {
    fn decide(&self, input: &GuardInput<'_>) -> GuardDecision;
}

/// Admits any resolved user.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthenticatedGuard;

impl RouteGuard for AuthenticatedGuard {
    fn decide(&self, input: &GuardInput<'_>) -> GuardDecision {
        match input.identity {
            EntryState::Loading => GuardDecision::Pending,
            // Token present but nobody asked yet: the mount is about to.
            EntryState::Absent if input.has_token => GuardDecision::Pending,
            EntryState::Absent | EntryState::Errored(_) => GuardDecision::redirect(&input.routes.login),
            // A user without a token is a leftover from a teardown elsewhere.
            EntryState::Ready(_) if !input.has_token => GuardDecision::redirect(&input.routes.login),
            EntryState::Ready(_) => GuardDecision::Render,
        }
    }
}

/// Authenticated admission plus a role predicate. A failing predicate sends the
/// user to the landing surface, not the login surface.
#[derive(Debug, Clone, Copy)]
pub struct RoleRestrictedGuard {
    predicate: RolePredicate,
}

impl RoleRestrictedGuard {
    pub fn new(predicate: RolePredicate) -> Self { Self { predicate } }

    pub fn super_admin() -> Self { Self::new(RolePredicate::SUPER_ADMIN_ONLY) }

    pub fn administrative() -> Self { Self::new(RolePredicate::ADMINISTRATIVE) }

    pub fn predicate(&self) -> RolePredicate { self.predicate }
}

impl RouteGuard for RoleRestrictedGuard {
    fn decide(&self, input: &GuardInput<'_>) -> GuardDecision {
        let base = AuthenticatedGuard.decide(input);
        if !base.is_render() {
            return base;
        }
        match input.identity.ready() {
            Some(user) if self.predicate.admits(user.role) => GuardDecision::Render,
            _ => GuardDecision::redirect(&input.routes.landing),
        }
    }
}
