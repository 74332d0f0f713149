//! Execution trace store — per-conversation lifecycle records for model
//! calls, tool calls, and chain decisions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    ModelCall,
    ToolCall,
    Chain,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    pub id: String,
    pub conversation_id: String,
    pub turn_id: String,
    pub kind: TraceKind,
    pub name: String,
    pub status: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// RW-locked `conversation → records` map.
#[derive(Default)]
pub struct TraceStore {
    records: RwLock<HashMap<String, Vec<TraceRecord>>>,
}

impl TraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, record: TraceRecord) {
        self.records
            .write()
            .entry(record.conversation_id.clone())
            .or_default()
            .push(record);
    }

    /// Update the record with the given id in place.
    pub fn update(&self, conversation_id: &str, id: &str, f: impl FnOnce(&mut TraceRecord)) {
        let mut records = self.records.write();
        if let Some(record) = records
            .get_mut(conversation_id)
            .and_then(|list| list.iter_mut().find(|r| r.id == id))
        {
            f(record);
        }
    }

    pub fn list(&self, conversation_id: &str) -> Vec<TraceRecord> {
        self.records
            .read()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_update_list_round_trip() {
        let store = TraceStore::new();
        store.append(TraceRecord {
            id: "r1".into(),
            conversation_id: "c1".into(),
            turn_id: "t1".into(),
            kind: TraceKind::ToolCall,
            name: "demo".into(),
            status: "running".into(),
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        });

        store.update("c1", "r1", |r| {
            r.status = "failed".into();
            r.error = Some("boom".into());
            r.ended_at = Some(Utc::now());
        });

        let records = store.list("c1");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, "failed");
        assert_eq!(records[0].error.as_deref(), Some("boom"));
        assert!(store.list("c2").is_empty());
    }
}
