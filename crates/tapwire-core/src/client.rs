//! Schema-free client for the proxied backend.

use prost_reflect::DynamicMessage;
use tokio_stream::Stream;
use tonic::codec::Streaming;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

use crate::binding::MethodBinding;
use crate::codec::DynamicCodec;

/// One per proxied service; the same channel carries every method. Cheap to
/// clone, one clone per in-flight call.
#[derive(Debug, Clone)]
pub struct BackendClient {
    inner: tonic::client::Grpc<Channel>,
}

impl BackendClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn unary(
        &mut self,
        method: &MethodBinding,
        request: Request<DynamicMessage>,
    ) -> Result<Response<DynamicMessage>, Status> {
        self.ready().await?;
        self.inner
            .unary(
                request,
                method.path.clone(),
                DynamicCodec::new(method.response.clone()),
            )
            .await
    }

    pub async fn server_streaming(
        &mut self,
        method: &MethodBinding,
        request: Request<DynamicMessage>,
    ) -> Result<Response<Streaming<DynamicMessage>>, Status> {
        self.ready().await?;
        self.inner
            .server_streaming(
                request,
                method.path.clone(),
                DynamicCodec::new(method.response.clone()),
            )
            .await
    }

    pub async fn duplex<S>(
        &mut self,
        method: &MethodBinding,
        request: Request<S>,
    ) -> Result<Response<Streaming<DynamicMessage>>, Status>
    where
        S: Stream<Item = DynamicMessage> + Send + 'static,
    {
        self.ready().await?;
        self.inner
            .streaming(
                request,
                method.path.clone(),
                DynamicCodec::new(method.response.clone()),
            )
            .await
    }

    async fn ready(&mut self) -> Result<(), Status> {
        self.inner
            .ready()
            .await
            .map_err(|err| Status::unavailable(format!("backend was not ready: {err}")))
    }
}
