// Copyright (c) 2026 Tapwire Contributors
// SPDX-License-Identifier: Apache-2.0

//! The generic dispatcher.
//!
//! A hand-written tower service in the shape tonic generates: route on the
//! request path, hand the raw frames to `tonic::server::Grpc` with a dynamic
//! codec, and run the per-kind call state machine. Methods are resolved at
//! runtime through the service binding; only the service name is static, via
//! the `ProxiedService` marker.

use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use prost_reflect::DynamicMessage;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tonic::codegen::http;
use tonic::codegen::{empty_body, Body, BoxFuture, StdError};
use tonic::metadata::MetadataMap;
use tonic::server::NamedService;
use tonic::transport::Channel;
use tonic::{Extensions, Request, Response, Status, Streaming};

use crate::binding::{MethodBinding, MethodKind, ServiceBinding};
use crate::bridge::StreamBridge;
use crate::canon;
use crate::client::BackendClient;
use crate::codec::DynamicCodec;
use crate::error::{ProxyError, ProxyResult};
use crate::gate::ReleaseMode;
use crate::observer::Observer;
use crate::record::RecordId;

/// Response stream type for server-streaming and duplex handlers.
pub type MessageStream =
    Pin<Box<dyn Stream<Item = Result<DynamicMessage, Status>> + Send + 'static>>;

/// Static identity of the proxied service: the route prefix registered with
/// the transport. Methods stay fully dynamic.
pub trait ProxiedService: Send + Sync + 'static {
    const NAME: &'static str;
}

#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    /// Bounds both gate waits. `None` means a held call waits until the
    /// operator acts or the caller goes away.
    pub release_timeout: Option<Duration>,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    binding: ServiceBinding,
    client: BackendClient,
    observer: Arc<dyn Observer>,
    bridge: StreamBridge,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        binding: ServiceBinding,
        channel: Channel,
        observer: Arc<dyn Observer>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                binding,
                client: BackendClient::new(channel),
                observer,
                bridge: StreamBridge::new(),
                config,
            }),
        }
    }

    pub fn service_name(&self) -> &str {
        self.inner.binding.service_name()
    }

    fn method(&self, name: &str) -> Option<MethodBinding> {
        self.inner.binding.resolve(name).ok().cloned()
    }

    async fn unary(
        &self,
        method: MethodBinding,
        request: Request<DynamicMessage>,
    ) -> Result<Response<DynamicMessage>, Status> {
        let (metadata, _, message) = request.into_parts();
        let request_text = canon::canonicalize(&message).map_err(ProxyError::into_status)?;
        let id = self.inner.observer.on_arrival(
            self.inner.binding.service_name(),
            &method.name,
            request_text,
        );
        let guard = CancelGuard::new(Arc::clone(&self.inner.observer), id);
        let outcome = self.unary_call(&method, id, metadata, message).await;
        guard.disarm();
        match outcome {
            Ok(message) => {
                self.inner.observer.on_forwarded(id);
                Ok(Response::new(message))
            }
            Err(err) => Err(self.fail(id, &method.name, err)),
        }
    }

    async fn unary_call(
        &self,
        method: &MethodBinding,
        id: RecordId,
        metadata: MetadataMap,
        message: DynamicMessage,
    ) -> ProxyResult<DynamicMessage> {
        let inner = &self.inner;
        let mut client = inner.client.clone();

        if !inner.observer.should_intercept(&method.name) {
            let response = client
                .unary(
                    method,
                    Request::from_parts(metadata, Extensions::default(), message),
                )
                .await
                .map_err(ProxyError::Backend)?
                .into_inner();
            inner
                .observer
                .on_response(id, canon::canonicalize(&response)?, true);
            return Ok(response);
        }

        let mode = self.await_request_release(id).await?;
        let response = match mode {
            ReleaseMode::Synthesize => DynamicMessage::new(method.response.clone()),
            ReleaseMode::Forward => {
                let text = inner.observer.edited_request_text(id)?;
                let edited = canon::parse(&text, method.request.clone())?;
                client
                    .unary(
                        method,
                        Request::from_parts(metadata, Extensions::default(), edited),
                    )
                    .await
                    .map_err(ProxyError::Backend)?
                    .into_inner()
            }
        };
        inner
            .observer
            .on_response(id, canon::canonicalize(&response)?, true);
        self.await_response_release(id).await?;
        let text = inner.observer.edited_response_text(id)?;
        canon::parse(&text, method.response.clone())
    }

    async fn server_streaming(
        &self,
        method: MethodBinding,
        request: Request<DynamicMessage>,
    ) -> Result<Response<MessageStream>, Status> {
        let (metadata, _, message) = request.into_parts();
        let request_text = canon::canonicalize(&message).map_err(ProxyError::into_status)?;
        let id = self.inner.observer.on_arrival(
            self.inner.binding.service_name(),
            &method.name,
            request_text,
        );
        let guard = CancelGuard::new(Arc::clone(&self.inner.observer), id);
        let outcome = self.server_streaming_call(&method, id, metadata, message).await;
        guard.disarm();
        match outcome {
            Ok(messages) => {
                self.inner.observer.on_forwarded(id);
                let stream = tokio_stream::iter(messages.into_iter().map(Ok));
                Ok(Response::new(Box::pin(stream) as MessageStream))
            }
            Err(err) => Err(self.fail(id, &method.name, err)),
        }
    }

    async fn server_streaming_call(
        &self,
        method: &MethodBinding,
        id: RecordId,
        metadata: MetadataMap,
        message: DynamicMessage,
    ) -> ProxyResult<Vec<DynamicMessage>> {
        let inner = &self.inner;
        let mut client = inner.client.clone();

        if !inner.observer.should_intercept(&method.name) {
            let response = client
                .server_streaming(
                    method,
                    Request::from_parts(metadata, Extensions::default(), message),
                )
                .await
                .map_err(ProxyError::Backend)?;
            let messages = collect_stream(response).await?;
            inner
                .observer
                .on_response(id, canon::canonicalize_sequence(&messages)?, false);
            return Ok(messages);
        }

        match self.await_request_release(id).await? {
            ReleaseMode::Synthesize => {
                let placeholder = DynamicMessage::new(method.response.clone());
                inner
                    .observer
                    .on_response(id, canon::canonicalize(&placeholder)?, true);
                self.await_response_release(id).await?;
                let text = inner.observer.edited_response_text(id)?;
                Ok(vec![canon::parse(&text, method.response.clone())?])
            }
            ReleaseMode::Forward => {
                let text = inner.observer.edited_request_text(id)?;
                let edited = canon::parse(&text, method.request.clone())?;
                let response = client
                    .server_streaming(
                        method,
                        Request::from_parts(metadata, Extensions::default(), edited),
                    )
                    .await
                    .map_err(ProxyError::Backend)?;
                let messages = collect_stream(response).await?;
                // The sequence form is display-only; the buffered messages go
                // back to the caller unmodified after release.
                inner
                    .observer
                    .on_response(id, canon::canonicalize_sequence(&messages)?, false);
                self.await_response_release(id).await?;
                Ok(messages)
            }
        }
    }

    /// Duplex calls are never intercepted; every message flows through the
    /// method's shared pipe and gets its own call record.
    fn duplex(
        &self,
        method: MethodBinding,
        request: Request<Streaming<DynamicMessage>>,
    ) -> Response<MessageStream> {
        let inner = Arc::clone(&self.inner);
        let (metadata, _, mut caller) = request.into_parts();
        let pipe = inner.bridge.get_or_create(&method, &inner.client, metadata);
        let (tx, rx) = mpsc::channel::<Result<DynamicMessage, Status>>(16);
        tokio::spawn(async move {
            loop {
                let message = match caller.message().await {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(status) => {
                        tracing::warn!(method = %method.name, error = %status, "caller stream error");
                        let _ = tx.send(Err(status)).await;
                        break;
                    }
                };
                let text = match canon::canonicalize(&message) {
                    Ok(text) => text,
                    Err(err) => {
                        let _ = tx.send(Err(err.into_status())).await;
                        break;
                    }
                };
                let id = inner
                    .observer
                    .on_arrival(inner.binding.service_name(), &method.name, text);
                match pipe.exchange(message).await {
                    Ok(reply) => {
                        match canon::canonicalize(&reply) {
                            Ok(text) => inner.observer.on_response(id, text, true),
                            Err(err) => {
                                tracing::error!(id, error = %err, "response logging failed")
                            }
                        }
                        inner.observer.on_forwarded(id);
                        if tx.send(Ok(reply)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        inner.observer.on_error(id, &err.to_string());
                        let _ = tx.send(Err(err.into_status())).await;
                        break;
                    }
                }
            }
        });
        Response::new(Box::pin(ReceiverStream::new(rx)) as MessageStream)
    }

    async fn await_request_release(&self, id: RecordId) -> ProxyResult<ReleaseMode> {
        match self.inner.config.release_timeout {
            Some(limit) => {
                tokio::time::timeout(limit, self.inner.observer.await_request_release(id))
                    .await
                    .map_err(|_| ProxyError::ReleaseTimeout(limit))?
            }
            None => self.inner.observer.await_request_release(id).await,
        }
    }

    async fn await_response_release(&self, id: RecordId) -> ProxyResult<()> {
        match self.inner.config.release_timeout {
            Some(limit) => {
                tokio::time::timeout(limit, self.inner.observer.await_response_release(id))
                    .await
                    .map_err(|_| ProxyError::ReleaseTimeout(limit))?
            }
            None => self.inner.observer.await_response_release(id).await,
        }
    }

    fn fail(&self, id: RecordId, method: &str, err: ProxyError) -> Status {
        tracing::warn!(id, method, error = %err, "call failed");
        self.inner.observer.on_error(id, &err.to_string());
        err.into_status()
    }
}

async fn collect_stream(
    response: Response<Streaming<DynamicMessage>>,
) -> ProxyResult<Vec<DynamicMessage>> {
    let mut stream = response.into_inner();
    let mut messages = Vec::new();
    while let Some(message) = stream.message().await.map_err(ProxyError::Backend)? {
        messages.push(message);
    }
    Ok(messages)
}

/// Marks the record Errored when a handler future is dropped before
/// completing, which is how a caller-side cancellation reaches us.
struct CancelGuard {
    observer: Arc<dyn Observer>,
    id: RecordId,
    armed: bool,
}

impl CancelGuard {
    fn new(observer: Arc<dyn Observer>, id: RecordId) -> Self {
        Self {
            observer,
            id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.observer.on_error(self.id, "call canceled before completion");
        }
    }
}

/// The route service registered with the transport for `S::NAME`.
pub struct ProxyServer<S: ProxiedService> {
    dispatcher: Dispatcher,
    _service: PhantomData<fn() -> S>,
}

impl<S: ProxiedService> ProxyServer<S> {
    /// Fails when the binding's service does not match the registered route
    /// prefix.
    pub fn new(dispatcher: Dispatcher) -> ProxyResult<Self> {
        if dispatcher.service_name() != S::NAME {
            return Err(ProxyError::Internal(format!(
                "binding is for {} but the route prefix is {}",
                dispatcher.service_name(),
                S::NAME
            )));
        }
        Ok(Self {
            dispatcher,
            _service: PhantomData,
        })
    }
}

impl<S: ProxiedService> Clone for ProxyServer<S> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            _service: PhantomData,
        }
    }
}

impl<S: ProxiedService> NamedService for ProxyServer<S> {
    const NAME: &'static str = S::NAME;
}

struct UnaryHandler {
    dispatcher: Dispatcher,
    method: MethodBinding,
}

impl tonic::server::UnaryService<DynamicMessage> for UnaryHandler {
    type Response = DynamicMessage;
    type Future = BoxFuture<Response<DynamicMessage>, Status>;

    fn call(&mut self, request: Request<DynamicMessage>) -> Self::Future {
        let dispatcher = self.dispatcher.clone();
        let method = self.method.clone();
        Box::pin(async move { dispatcher.unary(method, request).await })
    }
}

struct ServerStreamingHandler {
    dispatcher: Dispatcher,
    method: MethodBinding,
}

impl tonic::server::ServerStreamingService<DynamicMessage> for ServerStreamingHandler {
    type Response = DynamicMessage;
    type ResponseStream = MessageStream;
    type Future = BoxFuture<Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: Request<DynamicMessage>) -> Self::Future {
        let dispatcher = self.dispatcher.clone();
        let method = self.method.clone();
        Box::pin(async move { dispatcher.server_streaming(method, request).await })
    }
}

struct DuplexHandler {
    dispatcher: Dispatcher,
    method: MethodBinding,
}

impl tonic::server::StreamingService<DynamicMessage> for DuplexHandler {
    type Response = DynamicMessage;
    type ResponseStream = MessageStream;
    type Future = BoxFuture<Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: Request<Streaming<DynamicMessage>>) -> Self::Future {
        let dispatcher = self.dispatcher.clone();
        let method = self.method.clone();
        Box::pin(async move { Ok(dispatcher.duplex(method, request)) })
    }
}

impl<S, B> tonic::codegen::Service<http::Request<B>> for ProxyServer<S>
where
    S: ProxiedService,
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::BoxBody>;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let dispatcher = self.dispatcher.clone();
        let method = req
            .uri()
            .path()
            .strip_prefix('/')
            .and_then(|path| path.strip_prefix(S::NAME))
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|name| dispatcher.method(name));
        match method {
            Some(method) => match method.kind {
                MethodKind::Unary => Box::pin(async move {
                    let mut grpc =
                        tonic::server::Grpc::new(DynamicCodec::new(method.request.clone()));
                    let handler = UnaryHandler { dispatcher, method };
                    Ok(grpc.unary(handler, req).await)
                }),
                MethodKind::ServerStreaming => Box::pin(async move {
                    let mut grpc =
                        tonic::server::Grpc::new(DynamicCodec::new(method.request.clone()));
                    let handler = ServerStreamingHandler { dispatcher, method };
                    Ok(grpc.server_streaming(handler, req).await)
                }),
                MethodKind::Duplex => Box::pin(async move {
                    let mut grpc =
                        tonic::server::Grpc::new(DynamicCodec::new(method.request.clone()));
                    let handler = DuplexHandler { dispatcher, method };
                    Ok(grpc.streaming(handler, req).await)
                }),
            },
            None => {
                tracing::warn!(path = req.uri().path(), "method not bound on proxy");
                Box::pin(async move { Ok(unimplemented_response()) })
            }
        }
    }
}

fn unimplemented_response() -> http::Response<tonic::body::BoxBody> {
    let mut response = http::Response::new(empty_body());
    response
        .headers_mut()
        .insert("grpc-status", http::HeaderValue::from_static("12"));
    response
        .headers_mut()
        .insert("content-type", http::HeaderValue::from_static("application/grpc"));
    response
}
