//! The call log: one record per RPC invocation, keyed by a monotonically
//! increasing id that is never reused. Records are only removed by a bulk
//! reset of the whole log.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::gate::ReleaseGate;

pub type RecordId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallStatus {
    Pending,
    AwaitingRequestRelease,
    AwaitingResponseRelease,
    Forwarded,
    Errored,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Pending => "pending",
            CallStatus::AwaitingRequestRelease => "awaiting-request-release",
            CallStatus::AwaitingResponseRelease => "awaiting-response-release",
            CallStatus::Forwarded => "forwarded",
            CallStatus::Errored => "errored",
        }
    }
}

#[derive(Debug)]
struct CallRecord {
    service: String,
    method: String,
    request_text: String,
    response_text: String,
    response_editable: bool,
    status: CallStatus,
    error: Option<String>,
    gate: Arc<ReleaseGate>,
}

/// Point-in-time copy of a record for operator surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct CallRecordView {
    pub id: RecordId,
    pub service: String,
    pub method: String,
    pub request_text: String,
    pub response_text: String,
    pub response_editable: bool,
    pub status: CallStatus,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct CallLog {
    next_id: AtomicU64,
    records: Mutex<BTreeMap<RecordId, CallRecord>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, service: &str, method: &str, request_text: String) -> RecordId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = CallRecord {
            service: service.to_string(),
            method: method.to_string(),
            request_text,
            response_text: String::new(),
            response_editable: true,
            status: CallStatus::Pending,
            error: None,
            gate: Arc::new(ReleaseGate::new()),
        };
        self.records.lock().insert(id, record);
        id
    }

    /// The gate outlives a bulk clear for anyone holding the returned handle.
    pub fn gate(&self, id: RecordId) -> Option<Arc<ReleaseGate>> {
        self.records.lock().get(&id).map(|r| Arc::clone(&r.gate))
    }

    pub fn set_status(&self, id: RecordId, status: CallStatus) {
        if let Some(record) = self.records.lock().get_mut(&id) {
            tracing::debug!(
                target: "tapwire.calls",
                id,
                from = record.status.as_str(),
                to = status.as_str(),
                "call status change"
            );
            record.status = status;
        }
    }

    pub fn set_error(&self, id: RecordId, error: &str) {
        if let Some(record) = self.records.lock().get_mut(&id) {
            record.status = CallStatus::Errored;
            record.error = Some(error.to_string());
            record.response_text = error.to_string();
            record.response_editable = false;
        }
    }

    /// Dispatcher-side response snapshot. `editable` is false for read-only
    /// display forms that must never be parsed back.
    pub fn set_response(&self, id: RecordId, text: String, editable: bool) -> bool {
        match self.records.lock().get_mut(&id) {
            Some(record) => {
                record.response_text = text;
                record.response_editable = editable;
                true
            }
            None => false,
        }
    }

    /// Operator-side request edit.
    pub fn edit_request_text(&self, id: RecordId, text: &str) -> bool {
        match self.records.lock().get_mut(&id) {
            Some(record) => {
                record.request_text = text.to_string();
                true
            }
            None => false,
        }
    }

    /// Operator-side response edit; refused for read-only responses.
    pub fn edit_response_text(&self, id: RecordId, text: &str) -> bool {
        match self.records.lock().get_mut(&id) {
            Some(record) if record.response_editable => {
                record.response_text = text.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn request_text(&self, id: RecordId) -> Option<String> {
        self.records.lock().get(&id).map(|r| r.request_text.clone())
    }

    pub fn response_text(&self, id: RecordId) -> Option<String> {
        self.records.lock().get(&id).map(|r| r.response_text.clone())
    }

    pub fn view(&self, id: RecordId) -> Option<CallRecordView> {
        self.records.lock().get(&id).map(|r| view_of(id, r))
    }

    /// All records in id order.
    pub fn views(&self) -> Vec<CallRecordView> {
        self.records
            .lock()
            .iter()
            .map(|(id, r)| view_of(*id, r))
            .collect()
    }

    /// Bulk reset. Ids keep increasing; they are never reused.
    pub fn clear(&self) {
        self.records.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

fn view_of(id: RecordId, record: &CallRecord) -> CallRecordView {
    CallRecordView {
        id,
        service: record.service.clone(),
        method: record.method.clone(),
        request_text: record.request_text.clone(),
        response_text: record.response_text.clone(),
        response_editable: record.response_editable,
        status: record.status,
        error: record.error.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::ReleaseMode;

    #[test]
    fn ids_are_monotonic_and_survive_a_clear() {
        let log = CallLog::new();
        let first = log.append("svc", "A", String::new());
        let second = log.append("svc", "B", String::new());
        assert!(second > first);
        log.clear();
        assert!(log.is_empty());
        let third = log.append("svc", "C", String::new());
        assert!(third > second, "ids are never reused");
    }

    #[test]
    fn views_come_back_in_id_order() {
        let log = CallLog::new();
        log.append("svc", "A", String::new());
        log.append("svc", "B", String::new());
        let methods: Vec<String> = log.views().into_iter().map(|v| v.method).collect();
        assert_eq!(methods, ["A", "B"]);
    }

    #[test]
    fn read_only_responses_refuse_operator_edits() {
        let log = CallLog::new();
        let id = log.append("svc", "A", String::new());
        assert!(log.set_response(id, "[]".to_string(), false));
        assert!(!log.edit_response_text(id, "{}"));
        assert_eq!(log.response_text(id).as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn held_gate_outlives_a_bulk_clear() {
        let log = CallLog::new();
        let id = log.append("svc", "A", String::new());
        let gate = log.gate(id).unwrap();
        log.clear();
        assert!(log.gate(id).is_none());
        gate.release_request(ReleaseMode::Synthesize);
        assert_eq!(gate.request_released().await, ReleaseMode::Synthesize);
    }
}
