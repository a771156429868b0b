//! Admission predicates over [`Role`]. All pure; guards and the view layer share them.

use super::principal::Role;

/// Predicate a role-restricted guard applies to the resolved user.
#[derive(Debug, Clone, Copy)]
pub enum RolePredicate {
    /// Admit any role listed.
    AnyOf(&'static [Role]),
    Custom(fn(Role) -> bool),
}

impl RolePredicate {
    pub const SUPER_ADMIN_ONLY: RolePredicate = RolePredicate::Custom(can_manage_platform);
    pub const ADMINISTRATIVE: RolePredicate = RolePredicate::Custom(can_manage_organization);

    pub fn admits(&self, role: Role) -> bool {
        match self {
            RolePredicate::AnyOf(roles) => roles.contains(&role),
            RolePredicate::Custom(f) => f(role),
        }
    }
}

/// Organization-scoped pages. Only ORG_ADMIN and SUPER_ADMIN count as administrative.
pub fn can_manage_organization(role: Role) -> bool { role.is_administrative() }

/// Cross-tenant pages (organization list, platform settings).
pub fn can_manage_platform(role: Role) -> bool { role == Role::SuperAdmin }
