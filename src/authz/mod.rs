//! Authorization guards consumed by route handlers.
//!
//! Two deliberately distinct contracts coexist here and in the resolver:
//! `is_unconditional_admin` short-circuits guard checks for superadmin, while
//! `permissions::resolver` stays formula-based for every user, superadmin
//! included, so an explicitly denied token is honored there. Both behaviors
//! are intentional and relied on by different call sites.

mod guards;

pub use guards::{
    load_active_user, require_manageable_target, require_permission, require_project_membership,
};

use crate::models::user::User;
use crate::permissions::{SUPERADMIN_LEVEL, SUPERADMIN_ROLE};

/// True when guard checks should be skipped entirely for this user. Used ONLY
/// by the guards; never by the resolver.
pub fn is_unconditional_admin(user: &User) -> bool {
    user.role == SUPERADMIN_ROLE || user.level == SUPERADMIN_LEVEL
}
