//! Effective-permission resolution.
//!
//! Precedence is fixed: `denied` beats `allowed` beats role membership, for
//! every user including superadmin. Superadmin bypass exists only in the
//! authorization guards (`crate::authz`), never here; the resolver is always
//! formula-based.

use std::collections::HashSet;

use serde::Serialize;
use sqlx::SqlitePool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppResult;
use crate::models::project_permission::{fetch_overlay, ProjectRestrictions};
use crate::models::user::User;
use crate::permissions::cache::RoleCache;
use crate::permissions::{normalize_token, normalize_token_set};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProjectPermissionSet {
    /// Sorted for stable output.
    pub permissions: Vec<String>,
    pub restrictions: ProjectRestrictions,
}

/// The role's base permission set for this user. A dangling role reference
/// degrades to an empty base set (permission checks stay total functions);
/// a datastore failure still surfaces as an error.
pub async fn role_base_permissions(
    pool: &SqlitePool,
    cache: &RoleCache,
    user: &User,
) -> AppResult<HashSet<String>> {
    match cache.get(pool, &user.role).await? {
        Some(role) => Ok(role.permission_set()),
        None => {
            tracing::warn!(
                user_id = %user.id,
                role = %user.role,
                "user references a missing role; base permission set is empty"
            );
            Ok(HashSet::new())
        }
    }
}

/// Pure combination step: `(base ∪ allowed) \ denied`, normalized.
pub fn effective_from(base: &HashSet<String>, user: &User) -> HashSet<String> {
    let allowed = normalize_token_set(&user.custom_permissions.allowed);
    let denied = normalize_token_set(&user.custom_permissions.denied);

    base.union(&allowed)
        .filter(|token| !denied.contains(*token))
        .cloned()
        .collect()
}

pub async fn effective_permissions(
    pool: &SqlitePool,
    cache: &RoleCache,
    user: &User,
) -> AppResult<HashSet<String>> {
    let base = role_base_permissions(pool, cache, user).await?;
    Ok(effective_from(&base, user))
}

/// Single-token check without materializing the full set. The denied list is
/// consulted first and wins unconditionally.
pub async fn has_permission(
    pool: &SqlitePool,
    cache: &RoleCache,
    user: &User,
    token: &str,
) -> AppResult<bool> {
    let Some(token) = normalize_token(token) else {
        return Ok(false);
    };

    let denied = normalize_token_set(&user.custom_permissions.denied);
    if denied.contains(&token) {
        return Ok(false);
    }

    let allowed = normalize_token_set(&user.custom_permissions.allowed);
    if allowed.contains(&token) {
        return Ok(true);
    }

    let base = role_base_permissions(pool, cache, user).await?;
    Ok(base.contains(&token))
}

/// Project-aware resolution: the global effective set refined by the active
/// overlay row for `(user, project)`, if any. Project-level `denied` beats
/// project-level `allowed` and the global set.
pub async fn effective_project_permissions(
    pool: &SqlitePool,
    cache: &RoleCache,
    user: &User,
    project_id: Uuid,
) -> AppResult<ProjectPermissionSet> {
    let global = effective_permissions(pool, cache, user).await?;

    let overlay = fetch_overlay(pool, user.id, project_id).await?;
    let overlay = match overlay {
        Some(row) if row.is_effective(crate::utils::utc_now()) => row,
        _ => {
            return Ok(ProjectPermissionSet {
                permissions: crate::permissions::sorted_tokens(&global),
                restrictions: ProjectRestrictions::default(),
            });
        }
    };

    let allowed = normalize_token_set(&overlay.permissions.allowed);
    let denied = normalize_token_set(&overlay.permissions.denied);

    let final_set: HashSet<String> = global
        .union(&allowed)
        .filter(|token| !denied.contains(*token))
        .cloned()
        .collect();

    Ok(ProjectPermissionSet {
        permissions: crate::permissions::sorted_tokens(&final_set),
        restrictions: overlay.restrictions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::{CustomPermissions, UserRestrictions};

    fn test_user(allowed: &[&str], denied: &[&str]) -> User {
        let now = chrono::Utc::now();
        User {
            id: Uuid::new_v4(),
            name: "Test".to_string(),
            email: "test@example.com".to_string(),
            role: "hr".to_string(),
            role_ref: Uuid::new_v4(),
            level: 4,
            custom_permissions: CustomPermissions {
                allowed: allowed.iter().map(|t| t.to_string()).collect(),
                denied: denied.iter().map(|t| t.to_string()).collect(),
            },
            is_active: true,
            restrictions: UserRestrictions::default(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn base(tokens: &[&str]) -> HashSet<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn denied_beats_role_and_allowed() {
        let user = test_user(&["leads:read"], &["leads:read"]);
        let effective = effective_from(&base(&["leads:read", "users:read"]), &user);
        assert!(!effective.contains("leads:read"));
        assert!(effective.contains("users:read"));
    }

    #[test]
    fn allowed_extends_role() {
        let user = test_user(&["reports:export"], &[]);
        let effective = effective_from(&base(&["users:read"]), &user);
        assert!(effective.contains("users:read"));
        assert!(effective.contains("reports:export"));
    }

    #[test]
    fn overrides_are_normalized() {
        let user = test_user(&[" Reports:Export "], &[" Users:Read "]);
        let effective = effective_from(&base(&["users:read"]), &user);
        assert!(effective.contains("reports:export"));
        assert!(!effective.contains("users:read"));
    }

    #[test]
    fn scenario_role_grant_with_user_denial() {
        // Role hr: users:read + leads:read; denied leads:read -> {users:read}
        let user = test_user(&[], &["leads:read"]);
        let effective = effective_from(&base(&["users:read", "leads:read"]), &user);
        assert_eq!(effective, base(&["users:read"]));
    }
}
