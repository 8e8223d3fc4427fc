//! Append-only progress log of observed state transitions.
//!
//! Entries are for progress display only. Control flow never reads them back.

use chrono::{DateTime, Utc};
use dsp_types::ProtocolState;
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// One observed state transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEntry {
    /// Display label from the fixed state label table.
    pub label: String,
    /// Wire name of the state, e.g. `REQUESTED`.
    pub raw_state: String,
    pub timestamp: DateTime<Utc>,
    pub is_terminal: bool,
    pub is_error: bool,
    /// Remote message or local error text, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StepEntry {
    pub fn for_state<S: ProtocolState>(state: S, detail: Option<String>) -> Self {
        Self {
            label: state.label().to_string(),
            raw_state: state.as_str().to_string(),
            timestamp: Utc::now(),
            is_terminal: state.is_terminal(),
            is_error: state.is_failure(),
            detail,
        }
    }

    /// Entry for a local failure that the remote never reported as a state
    /// (initiation rejected, retries exhausted, timeout).
    pub fn for_error<S: ProtocolState>(state: S, message: String) -> Self {
        Self {
            is_terminal: true,
            is_error: true,
            ..Self::for_state(state, Some(message))
        }
    }
}

/// Receives every state transition a driver observes, in order.
pub trait StepObserver: Send + Sync {
    fn record(&self, entry: StepEntry);
}

/// Cloneable handle to a step log shared between a driver and its owner.
#[derive(Clone, Debug, Default)]
pub struct StepLog {
    entries: Arc<Mutex<Vec<StepEntry>>>,
}

impl StepLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: StepEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }

    pub fn entries(&self) -> Vec<StepEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    /// Wire names of all recorded states, oldest first.
    pub fn raw_states(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.raw_state).collect()
    }
}

impl StepObserver for StepLog {
    fn record(&self, entry: StepEntry) {
        self.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsp_types::{NegotiationState, TransferState};

    #[test]
    fn entry_uses_label_table_and_terminal_flags() {
        let entry = StepEntry::for_state(NegotiationState::Requesting, None);
        assert_eq!(entry.label, "Requesting Contract");
        assert_eq!(entry.raw_state, "REQUESTING");
        assert!(!entry.is_terminal);

        let failed = StepEntry::for_state(TransferState::Terminated, Some("cancelled".into()));
        assert!(failed.is_terminal);
        assert!(failed.is_error);
        assert_eq!(failed.label, "Transfer Failed");
    }

    #[test]
    fn log_is_shared_between_clones() {
        let log = StepLog::new();
        let observer = log.clone();
        observer.record(StepEntry::for_state(TransferState::Initial, None));
        observer.record(StepEntry::for_state(TransferState::Provisioning, None));

        assert_eq!(log.raw_states(), vec!["INITIAL", "PROVISIONING"]);
        log.clear();
        assert!(observer.is_empty());
    }
}
