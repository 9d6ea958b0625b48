use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tapwire_core::dispatch::DispatcherConfig;
use tapwire_core::panel::OperatorPanel;
use tapwire_core::record::CallStatus;
use tapwire_daemon::app;
use tapwire_echo::EchoBackend;
use tapwire_protocol::pb;
use tapwire_protocol::pb::example_service_client::ExampleServiceClient;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Endpoint, Server};

async fn start_backend() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind backend");
    let addr = listener.local_addr().expect("backend addr");
    let incoming = TcpListenerStream::new(listener);
    let handle = tokio::spawn(async move {
        Server::builder()
            .add_service(EchoBackend::new().into_server())
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

fn request(message: &str) -> pb::ExampleRequest {
    pb::ExampleRequest {
        message: message.to_string(),
    }
}

#[tokio::test]
async fn duplex_responses_keep_request_order() {
    let (backend_addr, backend_handle) = start_backend().await;
    let (proxy_addr, panel, proxy_handle) = start_proxy(backend_addr, "").await;
    let mut c = client(proxy_addr).await;

    let outbound = tokio_stream::iter(vec![request("A"), request("B"), request("C")]);
    let mut replies = c.bi_di_stream(outbound).await.expect("bidi").into_inner();
    let mut got = Vec::new();
    while let Some(reply) = replies.message().await.expect("reply") {
        got.push(reply.message);
    }
    assert_eq!(got, ["Echo: A", "Echo: B", "Echo: C"]);

    let mut all_forwarded = false;
    for _ in 0..200 {
        let calls = panel.calls();
        if calls.len() == 3 && calls.iter().all(|r| r.status == CallStatus::Forwarded) {
            all_forwarded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(all_forwarded, "expected one forwarded record per duplex message");

    proxy_handle.abort();
    backend_handle.abort();
}

#[tokio::test]
async fn duplex_methods_are_never_intercepted() {
    let (backend_addr, backend_handle) = start_backend().await;
    // The pattern matches the duplex method name; it must still flow freely.
    let (proxy_addr, _panel, proxy_handle) = start_proxy(backend_addr, "BiDiStream").await;
    let mut c = client(proxy_addr).await;

    let exchange = async {
        let outbound = tokio_stream::iter(vec![request("ping")]);
        let mut replies = c.bi_di_stream(outbound).await.expect("bidi").into_inner();
        replies.message().await.expect("reply").expect("one reply")
    };
    let reply = tokio::time::timeout(Duration::from_secs(5), exchange)
        .await
        .expect("duplex call must not hold");
    assert_eq!(reply.message, "Echo: ping");

    proxy_handle.abort();
    backend_handle.abort();
}

#[tokio::test]
async fn sequential_duplex_calls_reuse_the_same_pipe() {
    let (backend_addr, backend_handle) = start_backend().await;
    let (proxy_addr, panel, proxy_handle) = start_proxy(backend_addr, "").await;

    let mut first = client(proxy_addr).await;
    let outbound = tokio_stream::iter(vec![request("one")]);
    let mut replies = first.bi_di_stream(outbound).await.expect("bidi").into_inner();
    assert_eq!(
        replies.message().await.expect("reply").expect("reply").message,
        "Echo: one"
    );

    // A second caller on the same method goes through the same backend
    // stream; the pump stays alive across callers.
    let mut second = client(proxy_addr).await;
    let outbound = tokio_stream::iter(vec![request("two")]);
    let mut replies = second.bi_di_stream(outbound).await.expect("bidi").into_inner();
    assert_eq!(
        replies.message().await.expect("reply").expect("reply").message,
        "Echo: two"
    );

    for _ in 0..200 {
        if panel.calls().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(panel.calls().len(), 2);

    proxy_handle.abort();
    backend_handle.abort();
}
