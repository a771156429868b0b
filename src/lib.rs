//! Session and authorization core for the multi-tenant administrative console.
//!
//! The [`controller::SessionController`] owns the bearer token (through the
//! durable session store), the shared identity and configuration caches, and
//! the transport every API call goes through. Route guards derive their
//! decisions from that state on every render.

pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod guard;
pub mod identity;
pub mod navigation;
pub mod storage;
pub mod transport;

pub use cache::{ConfigDomain, EntryState, IdentityState, OrgConfig};
pub use config::ConsoleConfig;
pub use controller::{SessionController, SessionEvent};
pub use error::{ConsoleError, ConsoleResult};
pub use guard::{AuthenticatedGuard, GuardDecision, GuardState, RoleRestrictedGuard, RouteGuard};
pub use identity::{Role, RolePredicate, Session, UserSnapshot};
pub use navigation::{HistoryNavigator, NavigationMode, Navigator, Routes};
