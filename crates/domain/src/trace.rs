use serde::Serialize;

/// Structured trace events emitted across all agently crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ClientConstructed {
        conversation_id: String,
        server: String,
    },
    ClientEvicted {
        conversation_id: String,
        server: String,
        reason: String,
    },
    SnapshotFetched {
        uri: String,
        bytes: u64,
        cache_path: String,
    },
    SnapshotRefreshed {
        uri: String,
        old_size: u64,
        new_size: u64,
    },
    ManifestBuilt {
        uri: String,
        entries: usize,
    },
    RetrievalMatched {
        location: String,
        documents: usize,
        duration_ms: u64,
    },
    ToolStarted {
        turn_id: String,
        tool_name: String,
        op_id: String,
    },
    ToolFinished {
        turn_id: String,
        tool_name: String,
        status: String,
        duration_ms: u64,
    },
    ChainEvaluated {
        conversation_id: String,
        chain_index: usize,
        target_agent_id: String,
        fired: bool,
        reason: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ag_event");
    }
}
