pub mod restore;

pub use restore::RestoreSummary;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What a journal row records about one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Read,
    Update,
    Delete,
}

/// One immutable journal row, stored as a JSON document in the
/// `<table>_audit` table so the normal query machinery applies to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event: EventKind,
    pub timestamp: String,
    pub identity: String,
    #[serde(default)]
    pub identity_name: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    /// The whole document as it existed before the mutation; null for
    /// `create` and `read`.
    #[serde(default)]
    pub previous: Option<Value>,
    /// The applied top-level keys, for `update`; null otherwise.
    #[serde(default)]
    pub diff: Option<Value>,
    pub transaction_id: String,
    pub event_id: String,
    pub query: String,
}

/// Shared state for all audit rows emitted by one driver call: one actor,
/// one timestamp, one transaction id.
#[derive(Debug, Clone)]
pub struct AuditTransaction {
    identity: String,
    identity_name: Option<String>,
    reason: Option<String>,
    query: String,
    timestamp: String,
    transaction_id: String,
}

impl AuditTransaction {
    pub fn begin(
        identity: &str,
        identity_name: Option<&str>,
        reason: Option<&str>,
        query: &str,
    ) -> Self {
        AuditTransaction {
            identity: identity.to_string(),
            identity_name: identity_name.map(str::to_string),
            reason: reason.map(str::to_string),
            query: query.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            transaction_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    fn event(&self, kind: EventKind, previous: Option<Value>, diff: Option<Value>) -> AuditEvent {
        AuditEvent {
            event: kind,
            timestamp: self.timestamp.clone(),
            identity: self.identity.clone(),
            identity_name: self.identity_name.clone(),
            reason: self.reason.clone(),
            previous,
            diff,
            transaction_id: self.transaction_id.clone(),
            event_id: Uuid::new_v4().to_string(),
            query: self.query.clone(),
        }
    }

    pub fn update(&self, previous: Value, diff: Value) -> AuditEvent {
        self.event(EventKind::Update, Some(previous), Some(diff))
    }

    pub fn delete(&self, previous: Value) -> AuditEvent {
        self.event(EventKind::Delete, Some(previous), None)
    }

    pub fn create(&self) -> AuditEvent {
        self.event(EventKind::Create, None, None)
    }

    pub fn read(&self) -> AuditEvent {
        self.event(EventKind::Read, None, None)
    }
}
