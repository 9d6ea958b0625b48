//! The in-process operator surface: call log, release gates, and the
//! intercept rule.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::error::{ProxyError, ProxyResult};
use crate::gate::ReleaseMode;
use crate::observer::Observer;
use crate::record::{CallLog, CallRecordView, CallStatus, RecordId};

#[derive(Debug, Default)]
pub struct OperatorPanel {
    log: CallLog,
    pattern: Mutex<String>,
    duplex_methods: HashSet<String>,
}

impl OperatorPanel {
    pub fn new(duplex_methods: HashSet<String>) -> Self {
        Self {
            log: CallLog::new(),
            pattern: Mutex::new(String::new()),
            duplex_methods,
        }
    }

    /// Case-insensitive substring matched against method names. Empty
    /// disables interception.
    pub fn set_intercept_pattern(&self, pattern: &str) {
        *self.pattern.lock() = pattern.trim().to_string();
    }

    pub fn intercept_pattern(&self) -> String {
        self.pattern.lock().clone()
    }

    pub fn calls(&self) -> Vec<CallRecordView> {
        self.log.views()
    }

    pub fn call(&self, id: RecordId) -> Option<CallRecordView> {
        self.log.view(id)
    }

    pub fn set_request_text(&self, id: RecordId, text: &str) -> bool {
        self.log.edit_request_text(id, text)
    }

    pub fn set_response_text(&self, id: RecordId, text: &str) -> bool {
        self.log.edit_response_text(id, text)
    }

    pub fn release_request(&self, id: RecordId, mode: ReleaseMode) -> bool {
        match self.log.gate(id) {
            Some(gate) => {
                gate.release_request(mode);
                true
            }
            None => false,
        }
    }

    pub fn release_response(&self, id: RecordId) -> bool {
        match self.log.gate(id) {
            Some(gate) => {
                gate.release_response();
                true
            }
            None => false,
        }
    }

    /// Bulk reset of the whole log. In-flight calls keep their gate handles;
    /// their next record access fails with `RecordGone`.
    pub fn clear(&self) {
        self.log.clear();
    }
}

#[tonic::async_trait]
impl Observer for OperatorPanel {
    fn on_arrival(&self, service: &str, method: &str, request_text: String) -> RecordId {
        let id = self.log.append(service, method, request_text);
        tracing::info!(id, service, method, "call arrived");
        id
    }

    fn on_response(&self, id: RecordId, response_text: String, editable: bool) {
        self.log.set_response(id, response_text, editable);
    }

    fn on_forwarded(&self, id: RecordId) {
        self.log.set_status(id, CallStatus::Forwarded);
    }

    fn on_error(&self, id: RecordId, error: &str) {
        tracing::warn!(id, error, "call errored");
        self.log.set_error(id, error);
    }

    fn should_intercept(&self, method: &str) -> bool {
        let pattern = self.pattern.lock().clone();
        if pattern.is_empty() {
            return false;
        }
        if self.duplex_methods.contains(method) {
            return false;
        }
        method.to_lowercase().contains(&pattern.to_lowercase())
    }

    async fn await_request_release(&self, id: RecordId) -> ProxyResult<ReleaseMode> {
        let gate = self.log.gate(id).ok_or(ProxyError::RecordGone(id))?;
        self.log.set_status(id, CallStatus::AwaitingRequestRelease);
        Ok(gate.request_released().await)
    }

    async fn await_response_release(&self, id: RecordId) -> ProxyResult<()> {
        let gate = self.log.gate(id).ok_or(ProxyError::RecordGone(id))?;
        self.log.set_status(id, CallStatus::AwaitingResponseRelease);
        gate.response_released().await;
        Ok(())
    }

    fn edited_request_text(&self, id: RecordId) -> ProxyResult<String> {
        self.log.request_text(id).ok_or(ProxyError::RecordGone(id))
    }

    fn edited_response_text(&self, id: RecordId) -> ProxyResult<String> {
        self.log.response_text(id).ok_or(ProxyError::RecordGone(id))
    }
}
