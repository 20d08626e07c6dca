use uuid::Uuid;

use crate::errors::AppError;

pub mod project;
pub mod project_permission;
pub mod reporting;
pub mod role;
pub mod user;

/// Decode a JSON-array TEXT column into a string list. Empty/NULL-ish columns
/// decode as an empty list rather than an error.
pub(crate) fn json_string_list(raw: &str) -> Result<Vec<String>, AppError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw)
        .map_err(|err| AppError::internal(format!("malformed JSON list column: {err}")))
}

pub(crate) fn json_uuid_list(raw: &str) -> Result<Vec<Uuid>, AppError> {
    let items = json_string_list(raw)?;
    items
        .iter()
        .map(|s| {
            Uuid::parse_str(s)
                .map_err(|err| AppError::internal(format!("malformed uuid in JSON column: {err}")))
        })
        .collect()
}

pub(crate) fn to_json_list<S: AsRef<str>>(items: &[S]) -> String {
    let items: Vec<&str> = items.iter().map(|s| s.as_ref()).collect();
    serde_json::to_string(&items).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn to_json_uuid_list(items: &[Uuid]) -> String {
    let items: Vec<String> = items.iter().map(|u| u.to_string()).collect();
    to_json_list(&items)
}

pub(crate) fn parse_uuid(raw: &str, what: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|err| AppError::internal(format!("malformed {what} id: {err}")))
}
