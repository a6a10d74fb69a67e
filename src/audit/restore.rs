//! The pure half of the restore engine: choosing which audit row wins per
//! primary key, and diffing a current document against a target state. The
//! driver's `table_restore` applies these decisions inside one transaction.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::audit::{AuditEvent, EventKind};
use crate::uql::path::Path;

/// What a restore call did, by primary key: `restored` rows were re-inserted
/// after a delete, `updated` rows were patched back to a prior state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreSummary {
    pub restored: Vec<Value>,
    pub updated: Vec<Value>,
}

impl RestoreSummary {
    pub fn is_empty(&self) -> bool {
        self.restored.is_empty() && self.updated.is_empty()
    }
}

/// One primary key's winning pre-mutation state.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub pk: Value,
    pub previous: Value,
}

/// Reduce matching audit rows to one winner per distinct primary key.
///
/// Only `update` and `delete` rows carry a pre-mutation state. The winner is
/// the row with the greatest timestamp; timestamp ties break on the greatest
/// transaction id. Winners come back ordered by (timestamp, transaction id)
/// so restore work is applied deterministically.
pub(crate) fn winning_candidates(events: &[AuditEvent], pk_path: &Path) -> Vec<Candidate> {
    struct Slot<'a> {
        key: String,
        timestamp: &'a str,
        transaction_id: &'a str,
        pk: Value,
        previous: &'a Value,
    }
    let mut best: Vec<Slot<'_>> = Vec::new();
    for event in events {
        if !matches!(event.event, EventKind::Update | EventKind::Delete) {
            continue;
        }
        let Some(previous) = &event.previous else {
            continue;
        };
        let pk = pk_path.resolve(previous);
        if pk.is_null() {
            continue;
        }
        let key = pk.to_string();
        match best.iter_mut().find(|slot| slot.key == key) {
            None => best.push(Slot {
                key,
                timestamp: &event.timestamp,
                transaction_id: &event.transaction_id,
                pk,
                previous,
            }),
            Some(slot) => {
                let held = (slot.timestamp, slot.transaction_id);
                let offered = (event.timestamp.as_str(), event.transaction_id.as_str());
                if offered > held {
                    slot.timestamp = &event.timestamp;
                    slot.transaction_id = &event.transaction_id;
                    slot.pk = pk;
                    slot.previous = previous;
                }
            }
        }
    }
    best.sort_by(|a, b| (a.timestamp, a.transaction_id).cmp(&(b.timestamp, b.transaction_id)));
    best.into_iter()
        .map(|slot| Candidate {
            pk: slot.pk,
            previous: slot.previous.clone(),
        })
        .collect()
}

/// Top-level keys of `target` whose value differs in `current`. An empty
/// result means the document already matches the journaled state; otherwise
/// the keys are recorded as the diff on the restore's own journal row.
pub(crate) fn diff_documents(current: &Value, target: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    let Some(target_obj) = target.as_object() else {
        return out;
    };
    for (key, value) in target_obj {
        if current.get(key) != Some(value) {
            out.insert(key.clone(), value.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditTransaction;
    use crate::uql::parser::parse_path;
    use serde_json::json;

    fn event_at(ts: &str, tx: &str, kind: EventKind, previous: Value) -> AuditEvent {
        let mut e = AuditTransaction::begin("u", None, None, "").delete(previous);
        e.event = kind;
        e.timestamp = ts.to_string();
        e.transaction_id = tx.to_string();
        e
    }

    #[test]
    fn test_latest_timestamp_wins() {
        let pk = parse_path("id").unwrap();
        let events = vec![
            event_at("2024-01-01T00:00:00Z", "a", EventKind::Update, json!({"id": 1, "v": "old"})),
            event_at("2024-02-01T00:00:00Z", "b", EventKind::Update, json!({"id": 1, "v": "new"})),
        ];
        let winners = winning_candidates(&events, &pk);
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].previous["v"], json!("new"));
    }

    #[test]
    fn test_timestamp_tie_breaks_on_transaction_id() {
        let pk = parse_path("id").unwrap();
        let events = vec![
            event_at("2024-01-01T00:00:00Z", "zzz", EventKind::Update, json!({"id": 1, "v": "z"})),
            event_at("2024-01-01T00:00:00Z", "aaa", EventKind::Update, json!({"id": 1, "v": "a"})),
        ];
        let winners = winning_candidates(&events, &pk);
        assert_eq!(winners[0].previous["v"], json!("z"));
    }

    #[test]
    fn test_create_and_read_rows_are_ignored() {
        let pk = parse_path("id").unwrap();
        let tsc = AuditTransaction::begin("u", None, None, "");
        let events = vec![tsc.create(), tsc.read()];
        assert!(winning_candidates(&events, &pk).is_empty());
    }

    #[test]
    fn test_rows_without_pk_are_skipped() {
        let pk = parse_path("id").unwrap();
        let events = vec![event_at(
            "2024-01-01T00:00:00Z",
            "a",
            EventKind::Delete,
            json!({"v": 1}),
        )];
        assert!(winning_candidates(&events, &pk).is_empty());
    }

    #[test]
    fn test_winners_ordered_by_timestamp() {
        let pk = parse_path("id").unwrap();
        let events = vec![
            event_at("2024-03-01T00:00:00Z", "a", EventKind::Delete, json!({"id": 2})),
            event_at("2024-01-01T00:00:00Z", "b", EventKind::Delete, json!({"id": 1})),
        ];
        let winners = winning_candidates(&events, &pk);
        assert_eq!(winners[0].pk, json!(1));
        assert_eq!(winners[1].pk, json!(2));
    }

    #[test]
    fn test_diff_reports_changed_and_missing_keys() {
        let current = json!({"id": 1, "saying": "excellent", "later": true});
        let target = json!({"id": 1, "saying": "good", "gone": 3});
        let diff = diff_documents(&current, &target);
        assert_eq!(
            Value::Object(diff),
            json!({"saying": "good", "gone": 3})
        );
    }

    #[test]
    fn test_diff_of_identical_documents_is_empty() {
        let doc = json!({"id": 1, "saying": "good"});
        assert!(diff_documents(&doc, &doc).is_empty());
    }
}
