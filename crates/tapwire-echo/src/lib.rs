// Copyright (c) 2026 Tapwire Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tapwire_protocol::pb;
use tapwire_protocol::pb::example_service_server::{ExampleService, ExampleServiceServer};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tonic::{Request, Response, Status, Streaming};

type EchoStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

/// Trivial echo implementation of the demo service. The unary call counter
/// lets tests assert that Synthesize mode never reaches the backend.
#[derive(Debug, Clone, Default)]
pub struct EchoBackend {
    unary_calls: Arc<AtomicUsize>,
}

impl EchoBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unary_calls(&self) -> usize {
        self.unary_calls.load(Ordering::SeqCst)
    }

    pub fn into_server(self) -> ExampleServiceServer<EchoBackend> {
        ExampleServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl ExampleService for EchoBackend {
    async fn unary_method(
        &self,
        request: Request<pb::ExampleRequest>,
    ) -> Result<Response<pb::ExampleResponse>, Status> {
        self.unary_calls.fetch_add(1, Ordering::SeqCst);
        let request = request.into_inner();
        Ok(Response::new(pb::ExampleResponse {
            message: format!("Received: {}", request.message),
        }))
    }

    type ServerStreamMethodStream = EchoStream<pb::ServerStreamMethodResponse>;

    async fn server_stream_method(
        &self,
        request: Request<pb::ServerStreamMethodRequest>,
    ) -> Result<Response<Self::ServerStreamMethodStream>, Status> {
        let request = request.into_inner();
        let count = request.count.max(1);
        let chunks: Vec<Result<pb::ServerStreamMethodResponse, Status>> = (0..count)
            .map(|index| {
                Ok(pb::ServerStreamMethodResponse {
                    message: format!("Chunk {index}: {}", request.message),
                    index,
                })
            })
            .collect();
        Ok(Response::new(
            Box::pin(tokio_stream::iter(chunks)) as Self::ServerStreamMethodStream
        ))
    }

    type BiDiStreamStream = EchoStream<pb::ExampleResponse>;

    async fn bi_di_stream(
        &self,
        request: Request<Streaming<pb::ExampleRequest>>,
    ) -> Result<Response<Self::BiDiStreamStream>, Status> {
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            loop {
                match inbound.message().await {
                    Ok(Some(message)) => {
                        let reply = pb::ExampleResponse {
                            message: format!("Echo: {}", message.message),
                        };
                        if tx.send(Ok(reply)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(status) => {
                        let _ = tx.send(Err(status)).await;
                        break;
                    }
                }
            }
        });
        Ok(Response::new(
            Box::pin(ReceiverStream::new(rx)) as Self::BiDiStreamStream
        ))
    }
}
