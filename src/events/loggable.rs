use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity levels for activity logs. Controls retention and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Long-term retention, never auto-deleted
    Critical,
    /// Medium-term retention (default)
    #[default]
    Important,
    /// Aggressively trimmed
    Noise,
}

/// Trait for entities that appear in the activity log. The entity type becomes
/// the prefix in event names like "role.updated".
pub trait Loggable: Serialize + Send + Sync {
    fn entity_type() -> &'static str;

    /// The subject id (usually the entity's primary key)
    fn subject_id(&self) -> Uuid;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "deleted" => Severity::Critical,
            "created" | "updated" => self.severity(),
            _ => Severity::Important,
        }
    }
}
