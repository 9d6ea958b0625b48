//! Contract between the dispatcher and the operator-facing surface.

use crate::error::ProxyResult;
use crate::gate::ReleaseMode;
use crate::record::RecordId;

/// The dispatcher canonicalizes every message before reporting, so
/// implementors deal only in text. `OperatorPanel` is the in-process
/// implementation; an interactive UI would drive a shared handle to it.
#[tonic::async_trait]
pub trait Observer: Send + Sync + 'static {
    /// A call (or one duplex message) arrived; returns its record id.
    fn on_arrival(&self, service: &str, method: &str, request_text: String) -> RecordId;

    /// The response for a call is known. `editable` is false when the text is
    /// a read-only display form that must not be parsed back.
    fn on_response(&self, id: RecordId, response_text: String, editable: bool);

    /// The call completed and its final message went back to the caller.
    fn on_forwarded(&self, id: RecordId);

    /// The call failed. Full detail; never forwarded to the caller.
    fn on_error(&self, id: RecordId, error: &str);

    fn should_intercept(&self, method: &str) -> bool;

    /// Suspends until the operator releases the request gate.
    async fn await_request_release(&self, id: RecordId) -> ProxyResult<ReleaseMode>;

    /// Suspends until the operator releases the response gate.
    async fn await_response_release(&self, id: RecordId) -> ProxyResult<()>;

    fn edited_request_text(&self, id: RecordId) -> ProxyResult<String>;

    fn edited_response_text(&self, id: RecordId) -> ProxyResult<String>;
}
