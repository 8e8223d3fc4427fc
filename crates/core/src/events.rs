//! Bounded log of protocol events.
//!
//! Drivers record what they send and receive here so a UI or CLI can show the protocol
//! conversation. The log starts empty, evicts its oldest events once `capacity` is reached
//! and is only emptied by an explicit [`ProtocolEventLog::clear`]. Clones share storage.

use crate::config::OperatingMode;
use crate::constants::DEFAULT_EVENT_LOG_CAPACITY;
use crate::error::Process;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outbound,
    Inbound,
    Internal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventStatus {
    Pending,
    InProgress,
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolEvent {
    pub timestamp: DateTime<Utc>,
    pub phase: Process,
    pub action: String,
    pub direction: Direction,
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub source: OperatingMode,
}

impl ProtocolEvent {
    pub fn new(
        phase: Process,
        action: impl Into<String>,
        direction: Direction,
        status: EventStatus,
        source: OperatingMode,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            phase,
            action: action.into(),
            direction,
            status,
            detail: None,
            source,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Clone, Debug)]
pub struct ProtocolEventLog {
    events: Arc<Mutex<VecDeque<ProtocolEvent>>>,
    capacity: usize,
}

impl Default for ProtocolEventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_LOG_CAPACITY)
    }
}

impl ProtocolEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A capacity of zero is bumped to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn record(&self, event: ProtocolEvent) {
        let Ok(mut events) = self.events.lock() else {
            return;
        };
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Copy of the retained events, oldest first.
    pub fn snapshot(&self) -> Vec<ProtocolEvent> {
        self.events
            .lock()
            .map(|events| events.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(action: &str) -> ProtocolEvent {
        ProtocolEvent::new(
            Process::Negotiation,
            action,
            Direction::Outbound,
            EventStatus::Pending,
            OperatingMode::DirectMock,
        )
    }

    #[test]
    fn evicts_oldest_when_full() {
        let log = ProtocolEventLog::with_capacity(2);
        log.record(event("ContractRequestMessage"));
        log.record(event("ContractOfferMessage"));
        log.record(event("ContractAgreementMessage"));

        let actions: Vec<_> = log.snapshot().into_iter().map(|e| e.action).collect();
        assert_eq!(actions, vec!["ContractOfferMessage", "ContractAgreementMessage"]);
    }

    #[test]
    fn clear_empties_all_clones() {
        let log = ProtocolEventLog::new();
        let shared = log.clone();
        shared.record(event("ContractRequestMessage").with_detail("ehr:EHR001"));
        assert_eq!(log.len(), 1);

        log.clear();
        assert!(shared.is_empty());
        assert_eq!(shared.capacity(), DEFAULT_EVENT_LOG_CAPACITY);
    }

    #[test]
    fn zero_capacity_still_keeps_latest_event() {
        let log = ProtocolEventLog::with_capacity(0);
        log.record(event("a"));
        log.record(event("b"));
        assert_eq!(log.snapshot()[0].action, "b");
    }
}
