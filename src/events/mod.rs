use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<T> {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub payload: T,
}

impl<T> DomainEvent<T> {
    pub fn new(name: String, actor_id: Option<Uuid>, subject_id: Option<Uuid>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            occurred_at: Utc::now(),
            actor_id,
            subject_id,
            payload,
        }
    }
}

pub type EventBus = broadcast::Sender<Value>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<Value>) {
    broadcast::channel(1024)
}

/// Structured activity payload: the entity's new state, optionally its old
/// state, and the severity governing retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPayload {
    #[serde(rename = "new")]
    pub current: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    pub severity: Severity,
}

/// Fire-and-forget activity logging for any `Loggable` entity; a full bus or
/// closed listener never fails the request.
pub fn log_activity<T: Loggable>(
    event_bus: &EventBus,
    action: &str,
    actor_id: Option<Uuid>,
    entity: &T,
) {
    let event_name = format!("{}.{}", T::entity_type(), action);
    let severity = entity.severity_for_action(action);

    let payload = ActivityPayload {
        current: serde_json::to_value(entity).unwrap_or_default(),
        old: None,
        severity,
    };

    let event = DomainEvent::new(
        event_name,
        actor_id,
        Some(entity.subject_id()),
        serde_json::to_value(&payload).unwrap_or_default(),
    );

    let _ = event_bus.send(serde_json::to_value(event).unwrap_or_default());
}

pub async fn start_activity_listener(mut rx: broadcast::Receiver<Value>, pool: SqlitePool) {
    tracing::info!("activity listener started");
    while let Ok(event) = rx.recv().await {
        let name = event.get("name").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
        let actor_id = event.get("actor_id").and_then(|v| v.as_str()).map(String::from);
        let subject_id = event.get("subject_id").and_then(|v| v.as_str()).map(String::from);
        let occurred_at = event
            .get("occurred_at")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| Utc::now().to_rfc3339());

        let severity = event
            .get("payload")
            .and_then(|p| p.get("severity"))
            .and_then(|s| s.as_str())
            .unwrap_or("important")
            .to_string();

        let description = describe(&name);
        let payload = serde_json::to_string(&event).unwrap_or_default();

        let result = sqlx::query(
            "INSERT INTO activity_logs (id, event_name, occurred_at, actor_id, subject_id, description, severity, payload, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&name)
        .bind(&occurred_at)
        .bind(&actor_id)
        .bind(&subject_id)
        .bind(description)
        .bind(&severity)
        .bind(&payload)
        .bind(Utc::now())
        .execute(&pool)
        .await;

        if let Err(err) = result {
            tracing::warn!(event = %name, error = %err, "failed to persist activity log entry");
        }
    }
    tracing::info!("activity listener stopped");
}

fn describe(event_name: &str) -> &'static str {
    match event_name {
        "role.created" => "Role created",
        "role.updated" => "Role updated",
        "role.deleted" => "Role deleted",
        "role.level_changed" => "Role level changed",
        "role.permissions_changed" => "Role permissions changed",
        "user.registered" => "New user registered",
        "user.updated" => "User updated",
        "user.permissions_changed" => "User permissions changed",
        "user.role_reassigned" => "User role reassigned",
        "project.created" => "Project created",
        "project.member_added" => "Project member added",
        "project.member_removed" => "Project member removed",
        "user_project_permission.updated" => "Project permission overlay updated",
        "user_project_permission.deleted" => "Project permission overlay removed",
        _ => "System event",
    }
}
