//! Who is signed in: roles, the user snapshot, admission predicates and the
//! persisted token the rest of the crate reads from.

mod principal;
mod session;
pub mod authorizer;

pub use principal::{Role, UserSnapshot};
pub use session::{DurableSessionStore, Session, SessionToken};
pub use authorizer::RolePredicate;
