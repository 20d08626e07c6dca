//! Allow/deny update protocol.
//!
//! User overrides are stored as a minimal diff against the role's base set:
//! `allowed` never duplicates a role grant and `denied` only lists role grants
//! being revoked. This keeps role-permission edits propagating cleanly through
//! the cascade.

use std::collections::HashSet;

use sqlx::SqlitePool;

use crate::errors::{AppError, AppResult};
use crate::models::user::{fetch_user, update_custom_permissions, User};
use crate::permissions::cache::RoleCache;
use crate::permissions::resolver::role_base_permissions;
use crate::permissions::{normalize_token_set, sorted_tokens};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDiff {
    pub allowed: Vec<String>,
    pub denied: Vec<String>,
}

/// `denied = role \ desired`, `allowed = desired \ role`. Both sides sorted.
pub fn minimal_diff(role_permissions: &HashSet<String>, desired: &HashSet<String>) -> PermissionDiff {
    let denied: HashSet<String> = role_permissions.difference(desired).cloned().collect();
    let allowed: HashSet<String> = desired.difference(role_permissions).cloned().collect();

    PermissionDiff {
        allowed: sorted_tokens(&allowed),
        denied: sorted_tokens(&denied),
    }
}

fn ensure_not_superadmin(user: &User) -> AppResult<()> {
    if user.has_superadmin_role() {
        return Err(AppError::forbidden_operation(
            "custom permissions of superadmin users cannot be modified; edit the superadmin role instead",
        ));
    }
    Ok(())
}

/// Overwrite the user's overrides so that their effective permission set
/// becomes exactly `desired` (modulo later role edits, which the cascade
/// rebases against).
pub async fn set_effective_permissions(
    pool: &SqlitePool,
    cache: &RoleCache,
    user: &User,
    desired: &[String],
) -> AppResult<User> {
    ensure_not_superadmin(user)?;

    let desired = normalize_token_set(desired);
    let role_permissions = role_base_permissions(pool, cache, user).await?;
    let diff = minimal_diff(&role_permissions, &desired);

    update_custom_permissions(pool, user.id, &diff.allowed, &diff.denied).await?;
    fetch_user(pool, user.id).await
}

/// Add `tokens` to the deny list, removing any overlap from the allow list.
/// Denial needs no role lookup; it wins regardless of the base set.
pub async fn deny_permissions(
    pool: &SqlitePool,
    user: &User,
    tokens: &[String],
) -> AppResult<User> {
    ensure_not_superadmin(user)?;

    let tokens = normalize_token_set(tokens);
    if tokens.is_empty() {
        return Err(AppError::validation("no valid permission tokens provided"));
    }

    let mut denied = normalize_token_set(&user.custom_permissions.denied);
    let mut allowed = normalize_token_set(&user.custom_permissions.allowed);

    denied.extend(tokens.iter().cloned());
    allowed.retain(|t| !tokens.contains(t));

    update_custom_permissions(pool, user.id, &sorted_tokens(&allowed), &sorted_tokens(&denied))
        .await?;
    fetch_user(pool, user.id).await
}

/// Remove `tokens` from the deny list; tokens the role does not already grant
/// are added to the allow list (minimal-diff form preserved).
pub async fn allow_permissions(
    pool: &SqlitePool,
    cache: &RoleCache,
    user: &User,
    tokens: &[String],
) -> AppResult<User> {
    ensure_not_superadmin(user)?;

    let tokens = normalize_token_set(tokens);
    if tokens.is_empty() {
        return Err(AppError::validation("no valid permission tokens provided"));
    }

    let role_permissions = role_base_permissions(pool, cache, user).await?;

    let mut denied = normalize_token_set(&user.custom_permissions.denied);
    let mut allowed = normalize_token_set(&user.custom_permissions.allowed);

    denied.retain(|t| !tokens.contains(t));
    for token in tokens {
        if !role_permissions.contains(&token) {
            allowed.insert(token);
        }
    }

    update_custom_permissions(pool, user.id, &sorted_tokens(&allowed), &sorted_tokens(&denied))
        .await?;
    fetch_user(pool, user.id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(tokens: &[&str]) -> HashSet<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn minimal_diff_splits_grants_and_revocations() {
        // Role sales: leads:read + leads:create; desired: leads:read + leads:delete
        let diff = minimal_diff(
            &set(&["leads:read", "leads:create"]),
            &set(&["leads:read", "leads:delete"]),
        );
        assert_eq!(diff.allowed, vec!["leads:delete"]);
        assert_eq!(diff.denied, vec!["leads:create"]);
    }

    #[test]
    fn minimal_diff_never_duplicates_role_grants() {
        let role = set(&["leads:read", "users:read"]);
        let diff = minimal_diff(&role, &role);
        assert!(diff.allowed.is_empty());
        assert!(diff.denied.is_empty());
    }

    #[test]
    fn minimal_diff_empty_desired_denies_everything() {
        let diff = minimal_diff(&set(&["a:b", "c:d"]), &set(&[]));
        assert!(diff.allowed.is_empty());
        assert_eq!(diff.denied, vec!["a:b", "c:d"]);
    }

    #[test]
    fn minimal_diff_is_idempotent() {
        let role = set(&["leads:read", "leads:create"]);
        let desired = set(&["leads:read", "reports:view"]);
        let first = minimal_diff(&role, &desired);
        let second = minimal_diff(&role, &desired);
        assert_eq!(first, second);
    }
}
