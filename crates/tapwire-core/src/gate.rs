//! Per-record release gates.
//!
//! Each held call carries two independent binary gates, request and
//! response, signaled over watch channels so a release that lands before the
//! wait begins is still observed.

use tokio::sync::watch;

/// What the operator decided for a held request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    /// Parse the edited request text and send it to the backend.
    Forward,
    /// Skip the backend and fabricate a fully-defaulted response locally.
    Synthesize,
}

#[derive(Debug)]
pub struct ReleaseGate {
    request: watch::Sender<Option<ReleaseMode>>,
    response: watch::Sender<bool>,
}

impl ReleaseGate {
    pub fn new() -> Self {
        let (request, _) = watch::channel(None);
        let (response, _) = watch::channel(false);
        Self { request, response }
    }

    pub fn release_request(&self, mode: ReleaseMode) {
        self.request.send_replace(Some(mode));
    }

    pub fn release_response(&self) {
        self.response.send_replace(true);
    }

    /// Suspends until the request gate opens, returning the chosen mode.
    pub async fn request_released(&self) -> ReleaseMode {
        let mut rx = self.request.subscribe();
        let result = match rx.wait_for(|mode| mode.is_some()).await {
            Ok(mode) => mode.unwrap_or(ReleaseMode::Forward),
            // The sender is owned by this gate, so the channel cannot close
            // while we are waiting on it.
            Err(_) => ReleaseMode::Forward,
        };
        result
    }

    /// Suspends until the response gate opens.
    pub async fn response_released(&self) {
        let mut rx = self.response.subscribe();
        let _ = rx.wait_for(|released| *released).await;
    }
}

impl Default for ReleaseGate {
    fn default() -> Self {
        Self::new()
    }
}
