use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tapwire_core::dispatch::DispatcherConfig;
use tapwire_core::panel::OperatorPanel;
use tapwire_core::record::{CallRecordView, CallStatus};
use tapwire_daemon::app;
use tapwire_echo::EchoBackend;
use tapwire_protocol::pb;
use tapwire_protocol::pb::example_service_client::ExampleServiceClient;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Endpoint, Server};

async fn start_backend(backend: EchoBackend) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind backend");
    let addr = listener.local_addr().expect("backend addr");
    let incoming = TcpListenerStream::new(listener);
    let handle = tokio::spawn(async move {
        Server::builder()
            .add_service(backend.into_server())
            .serve_with_incoming(incoming)
            .await
            .expect("backend run");
    });
    (addr, handle)
}

async fn start_proxy(
    backend: SocketAddr,
    intercept: &str,
) -> (SocketAddr, Arc<OperatorPanel>, JoinHandle<()>) {
    let channel = Endpoint::from_shared(format!("http://{backend}"))
        .expect("endpoint")
        .connect_lazy();
    let proxy = app::build(channel, intercept, DispatcherConfig::default()).expect("proxy wiring");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind proxy");
    let addr = listener.local_addr().expect("proxy addr");
    let incoming = TcpListenerStream::new(listener);
    let panel = proxy.panel.clone();
    let handle = tokio::spawn(async move {
        Server::builder()
            .add_service(proxy.service)
            .serve_with_incoming(incoming)
            .await
            .expect("proxy run");
    });
    (addr, panel, handle)
}

async fn client(addr: SocketAddr) -> ExampleServiceClient<Channel> {
    ExampleServiceClient::connect(format!("http://{addr}"))
        .await
        .expect("connect")
}

async fn wait_for_call<F>(panel: &OperatorPanel, predicate: F) -> CallRecordView
where
    F: Fn(&CallRecordView) -> bool,
{
    for _ in 0..200 {
        if let Some(record) = panel.calls().into_iter().find(|r| predicate(r)) {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no matching call record appeared");
}

#[tokio::test]
async fn unary_passthrough_returns_backend_response() {
    let backend = EchoBackend::new();
    let (backend_addr, backend_handle) = start_backend(backend.clone()).await;
    let (proxy_addr, panel, proxy_handle) = start_proxy(backend_addr, "").await;
    let mut c = client(proxy_addr).await;

    let response = c
        .unary_method(pb::ExampleRequest {
            message: "Hello".to_string(),
        })
        .await
        .expect("unary")
        .into_inner();
    assert_eq!(response.message, "Received: Hello");
    assert_eq!(backend.unary_calls(), 1);

    let record = wait_for_call(&panel, |r| r.status == CallStatus::Forwarded).await;
    assert_eq!(record.service, "example.ExampleService");
    assert_eq!(record.method, "UnaryMethod");
    assert!(record.error.is_none());
    let request: serde_json::Value =
        serde_json::from_str(&record.request_text).expect("request json");
    assert_eq!(request["message"], "Hello");
    let reply: serde_json::Value =
        serde_json::from_str(&record.response_text).expect("response json");
    assert_eq!(reply["message"], "Received: Hello");

    proxy_handle.abort();
    backend_handle.abort();
}

#[tokio::test]
async fn server_streaming_passthrough_logs_the_full_sequence() {
    let backend = EchoBackend::new();
    let (backend_addr, backend_handle) = start_backend(backend).await;
    let (proxy_addr, panel, proxy_handle) = start_proxy(backend_addr, "").await;
    let mut c = client(proxy_addr).await;

    let mut stream = c
        .server_stream_method(pb::ServerStreamMethodRequest {
            message: "part".to_string(),
            count: 3,
        })
        .await
        .expect("server stream")
        .into_inner();
    let mut messages = Vec::new();
    while let Some(message) = stream.message().await.expect("stream item") {
        messages.push(message);
    }
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].message, "Chunk 0: part");
    assert_eq!(messages[2].index, 2);

    let record = wait_for_call(&panel, |r| r.status == CallStatus::Forwarded).await;
    assert!(!record.response_editable, "sequence log is display-only");
    let logged: serde_json::Value =
        serde_json::from_str(&record.response_text).expect("sequence json");
    assert_eq!(logged.as_array().map(Vec::len), Some(3));
    assert_eq!(logged[1]["message"], "Chunk 1: part");

    proxy_handle.abort();
    backend_handle.abort();
}

#[tokio::test]
async fn unknown_method_gets_unimplemented_without_a_record() {
    use prost_reflect::{DescriptorPool, DynamicMessage};
    use tapwire_core::codec::DynamicCodec;
    use tonic::codegen::http::uri::PathAndQuery;

    let backend = EchoBackend::new();
    let (backend_addr, backend_handle) = start_backend(backend).await;
    let (proxy_addr, panel, proxy_handle) = start_proxy(backend_addr, "").await;

    let pool = DescriptorPool::decode(tapwire_protocol::FILE_DESCRIPTOR_SET).expect("pool");
    let desc = pool
        .get_message_by_name("example.ExampleRequest")
        .expect("request type");
    let channel = Endpoint::from_shared(format!("http://{proxy_addr}"))
        .expect("endpoint")
        .connect()
        .await
        .expect("connect");
    let mut grpc = tonic::client::Grpc::new(channel);
    grpc.ready().await.expect("ready");
    let path: PathAndQuery = "/example.ExampleService/Missing".parse().expect("path");
    let err = grpc
        .unary(
            tonic::Request::new(DynamicMessage::new(desc.clone())),
            path,
            DynamicCodec::new(desc),
        )
        .await
        .expect_err("unimplemented");
    assert_eq!(err.code(), tonic::Code::Unimplemented);
    assert!(panel.calls().is_empty(), "no record for an unbound method");

    proxy_handle.abort();
    backend_handle.abort();
}
