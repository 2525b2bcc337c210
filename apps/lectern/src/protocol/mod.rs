use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound event types consumed by the sync core.
pub mod event_type {
    pub const PROGRESS_UPDATE: &str = "progress_update";
    pub const CELL_EXECUTION: &str = "cell_execution";
    pub const HELP_REQUEST: &str = "help_request";
    pub const HELP_RESOLVED: &str = "help_resolved";

    // Synthetic connection events, generated locally and dispatched through
    // the same path as data messages.
    pub const CONNECTION_CONNECTED: &str = "connection_connected";
    pub const CONNECTION_DISCONNECTED: &str = "connection_disconnected";
    pub const CONNECTION_ERROR: &str = "connection_error";
    pub const CONNECTION_RECONNECTING: &str = "connection_reconnecting";
    pub const CONNECTION_RECONNECTION_FAILED: &str = "connection_reconnection_failed";
}

/// Outbound event types produced on user input. Handled by external
/// collaborators, never reprocessed here.
pub mod outbound_type {
    pub const INSTRUCTOR_STATUS_UPDATE: &str = "instructor_status_update";
    pub const INSTRUCTOR_LOCATION_UPDATE: &str = "instructor_location_update";
    pub const NOTIFICATION_SUBSCRIPTION: &str = "notification_subscription";
    pub const HELP_RESPONSE: &str = "help_response";
}

/// The wire envelope, both directions. Ephemeral; not retained after dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl EventMessage {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StudentStatus {
    Active,
    Idle,
    Offline,
}

fn default_confirmed() -> bool {
    true
}

/// One monitored student. Owned by the reconciler's canonical collection,
/// keyed by `id`. `confirmed` is local bookkeeping: false for entities first
/// seen via a delta, until a full snapshot vouches for them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub team: String,
    pub status: StudentStatus,
    pub progress: f64,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub is_urgent: bool,
    #[serde(default = "default_confirmed", skip_serializing)]
    pub confirmed: bool,
}

impl Student {
    /// Placeholder for a delta that raced ahead of the next full snapshot.
    pub fn unconfirmed(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            team: "unassigned".to_string(),
            status: StudentStatus::Idle,
            progress: 0.0,
            last_activity: Utc::now(),
            is_urgent: false,
            confirmed: false,
        }
    }
}

/// Field-level patch applied by incremental push events. Absent fields are
/// left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StudentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StudentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_urgent: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressUpdate {
    pub student_id: String,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StudentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CellExecution {
    pub student_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<String>,
    pub success: bool,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HelpRequest {
    pub student_id: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HelpResolved {
    pub student_id: String,
    pub resolved_at: DateTime<Utc>,
}

/// Typed constructors for the outbound messages the core can emit.
pub mod outbound {
    use super::*;
    use serde_json::json;

    pub fn instructor_status_update(status: &str) -> EventMessage {
        EventMessage::new(outbound_type::INSTRUCTOR_STATUS_UPDATE, json!({ "status": status }))
    }

    pub fn instructor_location_update(location: &str) -> EventMessage {
        EventMessage::new(
            outbound_type::INSTRUCTOR_LOCATION_UPDATE,
            json!({ "location": location }),
        )
    }

    pub fn notification_subscription(topics: &[&str]) -> EventMessage {
        EventMessage::new(
            outbound_type::NOTIFICATION_SUBSCRIPTION,
            json!({ "topics": topics }),
        )
    }

    pub fn help_response(student_id: &str, accepted: bool) -> EventMessage {
        EventMessage::new(
            outbound_type::HELP_RESPONSE,
            json!({ "student_id": student_id, "accepted": accepted }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_round_trips_with_renamed_type_field() {
        let msg = EventMessage::new(event_type::PROGRESS_UPDATE, json!({"student_id": "s1"}));
        let encoded = serde_json::to_string(&msg).unwrap();
        assert!(encoded.contains(r#""type":"progress_update""#));
        let decoded: EventMessage = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn student_without_confirmed_field_parses_as_confirmed() {
        let student: Student = serde_json::from_value(json!({
            "id": "s1",
            "name": "Ada",
            "team": "TeamA",
            "status": "active",
            "progress": 40.0,
            "last_activity": "2026-03-01T10:00:00Z"
        }))
        .unwrap();
        assert!(student.confirmed);
        assert!(!student.is_urgent);
    }

    #[test]
    fn patch_omits_absent_fields_on_the_wire() {
        let patch = StudentPatch {
            is_urgent: Some(true),
            ..Default::default()
        };
        let encoded = serde_json::to_string(&patch).unwrap();
        assert_eq!(encoded, r#"{"is_urgent":true}"#);
    }
}
