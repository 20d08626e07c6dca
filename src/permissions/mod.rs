//! Permission resolution engine: token normalization, the role cache, the
//! resolver combining role/user/project permission layers, the minimal-diff
//! update protocol, the role-mutation cascade, and the reporting-hierarchy
//! validator.

use std::collections::HashSet;

pub mod cache;
pub mod cascade;
pub mod diff;
pub mod hierarchy;
pub mod resolver;

pub const SUPERADMIN_ROLE: &str = "superadmin";
pub const SUPERADMIN_LEVEL: i64 = 1;
pub const MIN_LEVEL: i64 = 1;
pub const MAX_LEVEL: i64 = 10;

/// Well-known permission tokens (`resource:action`, lowercase).
pub mod tokens {
    pub const USERS_READ: &str = "users:read";
    pub const USERS_CREATE: &str = "users:create";
    pub const USERS_UPDATE: &str = "users:update";
    pub const USERS_DELETE: &str = "users:delete";
    pub const USERS_MANAGE: &str = "users:manage";

    pub const ROLES_READ: &str = "roles:read";
    pub const ROLES_MANAGE: &str = "roles:manage";

    pub const LEADS_READ: &str = "leads:read";
    pub const LEADS_CREATE: &str = "leads:create";
    pub const LEADS_UPDATE: &str = "leads:update";
    pub const LEADS_DELETE: &str = "leads:delete";

    pub const PROJECTS_READ: &str = "projects:read";
    pub const PROJECTS_CREATE: &str = "projects:create";
    pub const PROJECTS_UPDATE: &str = "projects:update";
    pub const PROJECTS_DELETE: &str = "projects:delete";
    pub const PROJECTS_MANAGE: &str = "projects:manage";

    pub const ATTENDANCE_READ: &str = "attendance:read";
    pub const ATTENDANCE_MANAGE: &str = "attendance:manage";

    pub const REPORTS_VIEW: &str = "reports:view";
    pub const REPORTS_EXPORT: &str = "reports:export";
}

/// Every known token; the superadmin role is seeded with this full set.
pub fn all_tokens() -> Vec<String> {
    use tokens::*;
    [
        USERS_READ, USERS_CREATE, USERS_UPDATE, USERS_DELETE, USERS_MANAGE,
        ROLES_READ, ROLES_MANAGE,
        LEADS_READ, LEADS_CREATE, LEADS_UPDATE, LEADS_DELETE,
        PROJECTS_READ, PROJECTS_CREATE, PROJECTS_UPDATE, PROJECTS_DELETE, PROJECTS_MANAGE,
        ATTENDANCE_READ, ATTENDANCE_MANAGE,
        REPORTS_VIEW, REPORTS_EXPORT,
    ]
    .iter()
    .map(|t| t.to_string())
    .collect()
}

/// Base permission set for the seeded default (`member`) role.
pub fn member_tokens() -> Vec<String> {
    use tokens::*;
    [LEADS_READ, LEADS_CREATE, LEADS_UPDATE, PROJECTS_READ, ATTENDANCE_READ, REPORTS_VIEW]
        .iter()
        .map(|t| t.to_string())
        .collect()
}

/// Normalize one permission token: trim and lowercase. Returns `None` for
/// tokens that are empty after trimming.
pub fn normalize_token(raw: &str) -> Option<String> {
    let token = raw.trim().to_lowercase();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Normalize a list of tokens into a set, dropping empties and duplicates.
pub fn normalize_token_set<I, S>(raw: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|t| normalize_token(t.as_ref()))
        .collect()
}

/// Normalized, deduplicated, sorted token list. This is the canonical
/// persisted form.
pub fn normalize_token_list<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut tokens: Vec<String> = normalize_token_set(raw).into_iter().collect();
    tokens.sort();
    tokens
}

/// Sorted view of a token set, for stable API output.
pub fn sorted_tokens(set: &HashSet<String>) -> Vec<String> {
    let mut tokens: Vec<String> = set.iter().cloned().collect();
    tokens.sort();
    tokens
}

pub fn validate_level(level: i64) -> Result<(), crate::errors::AppError> {
    if !(MIN_LEVEL..=MAX_LEVEL).contains(&level) {
        return Err(crate::errors::AppError::validation(format!(
            "level must be between {MIN_LEVEL} and {MAX_LEVEL}, got {level}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_token_trims_and_lowercases() {
        assert_eq!(normalize_token(" Leads:Read "), Some("leads:read".to_string()));
        assert_eq!(normalize_token("LEADS:DELETE"), Some("leads:delete".to_string()));
        assert_eq!(normalize_token("   "), None);
        assert_eq!(normalize_token(""), None);
    }

    #[test]
    fn normalize_token_set_dedupes() {
        let set = normalize_token_set(["leads:read", " LEADS:READ ", "", "users:read"]);
        assert_eq!(set.len(), 2);
        assert!(set.contains("leads:read"));
        assert!(set.contains("users:read"));
    }

    #[test]
    fn normalize_token_list_is_sorted() {
        let list = normalize_token_list(["users:read", "leads:read", "Users:Read"]);
        assert_eq!(list, vec!["leads:read", "users:read"]);
    }

    #[test]
    fn level_bounds() {
        assert!(validate_level(1).is_ok());
        assert!(validate_level(10).is_ok());
        assert!(validate_level(0).is_err());
        assert!(validate_level(11).is_err());
    }
}
