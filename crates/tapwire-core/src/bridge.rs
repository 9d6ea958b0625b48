//! Duplex stream bridging.
//!
//! Each duplex method gets at most one pipe for the lifetime of the process:
//! a bounded queue pair plus a pump task holding the single backend duplex
//! call open. Responses pair with requests purely by FIFO position, which is
//! correct while the backend answers one response per request in order.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use prost_reflect::DynamicMessage;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::MetadataMap;
use tonic::{Extensions, Request};

use crate::binding::MethodBinding;
use crate::client::BackendClient;
use crate::error::{ProxyError, ProxyResult};

/// Depth of each direction of a pipe; senders wait when the backend falls
/// this far behind.
pub const PIPE_DEPTH: usize = 64;

#[derive(Debug)]
pub struct StreamPipe {
    method: String,
    inbound: mpsc::Sender<DynamicMessage>,
    outbound: tokio::sync::Mutex<mpsc::Receiver<DynamicMessage>>,
    _pump: JoinHandle<()>,
}

impl StreamPipe {
    fn spawn(method: MethodBinding, client: BackendClient, metadata: MetadataMap) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(PIPE_DEPTH);
        let (outbound_tx, outbound_rx) = mpsc::channel(PIPE_DEPTH);
        let name = method.name.clone();
        let pump = tokio::spawn(pump(method, client, metadata, inbound_rx, outbound_tx));
        Self {
            method: name,
            inbound: inbound_tx,
            outbound: tokio::sync::Mutex::new(outbound_rx),
            _pump: pump,
        }
    }

    /// One caller message: push it onto the pipe, then wait for exactly one
    /// response. The receiver lock is held across both steps so concurrent
    /// callers cannot interleave their request/response pairings.
    pub async fn exchange(&self, message: DynamicMessage) -> ProxyResult<DynamicMessage> {
        let mut outbound = self.outbound.lock().await;
        self.inbound.send(message).await.map_err(|_| {
            ProxyError::Internal(format!("stream pipe for {} is closed", self.method))
        })?;
        outbound.recv().await.ok_or_else(|| {
            ProxyError::Internal(format!("backend stream for {} ended", self.method))
        })
    }
}

async fn pump(
    method: MethodBinding,
    mut client: BackendClient,
    metadata: MetadataMap,
    inbound: mpsc::Receiver<DynamicMessage>,
    outbound: mpsc::Sender<DynamicMessage>,
) {
    let requests = ReceiverStream::new(inbound);
    let request = Request::from_parts(metadata, Extensions::default(), requests);
    let mut responses = match client.duplex(&method, request).await {
        Ok(response) => response.into_inner(),
        Err(status) => {
            tracing::error!(method = %method.name, error = %status, "duplex backend call failed");
            return;
        }
    };
    loop {
        match responses.message().await {
            Ok(Some(message)) => {
                if outbound.send(message).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                tracing::info!(method = %method.name, "backend duplex stream ended");
                break;
            }
            Err(status) => {
                tracing::warn!(method = %method.name, error = %status, "duplex backend stream error");
                break;
            }
        }
    }
}

/// Pipes for different methods are fully independent; a degraded backend
/// stream takes down its own pipe only.
#[derive(Debug, Default)]
pub struct StreamBridge {
    pipes: Mutex<HashMap<String, Arc<StreamPipe>>>,
}

impl StreamBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// First caller wins; later calls for the same method reuse the pipe.
    pub fn get_or_create(
        &self,
        method: &MethodBinding,
        client: &BackendClient,
        metadata: MetadataMap,
    ) -> Arc<StreamPipe> {
        let mut pipes = self.pipes.lock();
        Arc::clone(pipes.entry(method.name.clone()).or_insert_with(|| {
            tracing::info!(method = %method.name, "opening duplex pipe");
            Arc::new(StreamPipe::spawn(method.clone(), client.clone(), metadata))
        }))
    }

    pub fn pipe_count(&self) -> usize {
        self.pipes.lock().len()
    }
}
