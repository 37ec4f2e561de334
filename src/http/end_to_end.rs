//! Clients and servers talking through a real relay on localhost, with faults injected by the
//!  relay.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::CONTENT_LENGTH;
use hyper::{Method, Request, StatusCode, Uri, Version};
use tokio::time::{sleep, timeout, Instant};
use crate::config::ClientConfig;
use crate::http::client::HttpClient;
use crate::http::handler::FileRequestHandler;
use crate::http::message::request;
use crate::http::url::parse_url;
use crate::storage::FsStorage;
use crate::test_util::relay::{DropFirst, FaultPolicy, NoFaults, RandomFaults, Relay};
use crate::transport::config::TransportConfig;
use crate::transport::dispatcher::Dispatcher;
use crate::transport::frame::FrameKind;
use crate::transport::request_handler::RequestHandler;
use crate::transport::seq::SeqBit;

const RETRANSMIT_TIMEOUT: Duration = Duration::from_millis(300);

struct CountingHandler {
    inner: FileRequestHandler,
    invocations: AtomicUsize,
}

#[async_trait]
impl RequestHandler for CountingHandler {
    async fn handle(&self, peer: SocketAddr, request: Bytes) -> Bytes {
        self.invocations.fetch_add(1, Ordering::AcqRel);
        self.inner.handle(peer, request).await
    }

    fn response_too_large(&self, len: usize, max: usize) -> Bytes {
        self.inner.response_too_large(len, max)
    }
}

fn transport_config(relay_addr: SocketAddr) -> TransportConfig {
    let mut config = TransportConfig::new(relay_addr);
    config.retransmit_timeout = RETRANSMIT_TIMEOUT;
    config.grace_period = RETRANSMIT_TIMEOUT * 3;
    config.idle_timeout = Duration::from_secs(3);
    config
}

fn v4(addr: SocketAddr) -> SocketAddrV4 {
    match addr {
        SocketAddr::V4(addr) => addr,
        SocketAddr::V6(addr) => panic!("expected an IPv4 address, got {:?}", addr),
    }
}

struct TestServer {
    addr: SocketAddrV4,
    dispatcher: Arc<Dispatcher>,
    handler: Arc<CountingHandler>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    async fn start(relay_addr: SocketAddr, files: &[(&str, &str)], redirects: &[(&str, &str)]) -> TestServer {
        TestServer::start_with(transport_config(relay_addr), files, redirects).await
    }

    async fn start_with(config: TransportConfig, files: &[(&str, &str)], redirects: &[(&str, &str)]) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }

        let storage = Arc::new(FsStorage::open(dir.path()).await.unwrap());
        let redirects = redirects.iter()
            .map(|(path, target)| (path.to_string(), target.to_string()))
            .collect();
        let handler = Arc::new(CountingHandler {
            inner: FileRequestHandler::new(storage, redirects, config.max_payload_len()),
            invocations: AtomicUsize::new(0),
        });

        let dispatcher = Arc::new(Dispatcher::bind("127.0.0.1:0".parse().unwrap(), handler.clone(), Arc::new(config)).await.unwrap());
        let addr = v4(dispatcher.local_addr().unwrap());
        let d = dispatcher.clone();
        tokio::spawn(async move { d.recv_loop().await });

        TestServer { addr, dispatcher, handler, _dir: dir }
    }

    fn url(&self, path: &str) -> Uri {
        parse_url(&format!("http://{}{}", self.addr, path)).unwrap()
    }

    fn invocations(&self) -> usize {
        self.handler.invocations.load(Ordering::Acquire)
    }

    async fn wait_until_idle(&self) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.dispatcher.num_sessions() > 0 {
            assert!(Instant::now() < deadline, "server sessions did not terminate");
            sleep(Duration::from_millis(20)).await;
        }
    }
}

async fn bind_relay() -> (Relay, SocketAddr) {
    let relay = Relay::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = relay.local_addr().unwrap();
    (relay, addr)
}

fn start_relay(relay: Relay, policy: impl FaultPolicy) {
    tokio::spawn(relay.run(Box::new(policy)));
}

fn client(relay_addr: SocketAddr) -> HttpClient {
    let mut config = ClientConfig::new(relay_addr);
    config.transport = transport_config(relay_addr);
    HttpClient::new(config).unwrap()
}

fn get() -> Request<Bytes> {
    request(Method::GET, Bytes::new())
}

fn post(body: &'static str) -> Request<Bytes> {
    request(Method::POST, Bytes::from_static(body.as_bytes()))
}

#[tokio::test]
async fn test_list_files() {
    let (relay, relay_addr) = bind_relay().await;
    let server = TestServer::start(relay_addr, &[("a.txt", "a"), ("b.txt", "b")], &[]).await;
    start_relay(relay, NoFaults);

    let mut client = client(relay_addr);
    let response = client.send(&server.url("/"), get()).await.unwrap();
    client.finish().await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"a.txt\nb.txt");
    assert_eq!(server.invocations(), 1);
    server.wait_until_idle().await;
}

#[tokio::test]
async fn test_missing_file() {
    let (relay, relay_addr) = bind_relay().await;
    let server = TestServer::start(relay_addr, &[], &[]).await;
    start_relay(relay, NoFaults);

    let mut client = client(relay_addr);
    let response = client.send(&server.url("/missing.txt"), get()).await.unwrap();
    client.finish().await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.body().as_ref(), b"File does not exist.");
}

#[tokio::test]
async fn test_post_then_get() {
    let (relay, relay_addr) = bind_relay().await;
    let server = TestServer::start(relay_addr, &[], &[]).await;
    start_relay(relay, NoFaults);

    let mut client = client(relay_addr);
    let response = client.send(&server.url("/new.txt"), post("hello")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client.send(&server.url("/new.txt"), get()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"hello");

    client.finish().await;
    assert_eq!(server.invocations(), 2);
}

#[tokio::test]
async fn test_lost_syn_ack_and_response() {
    let (relay, relay_addr) = bind_relay().await;
    let server = TestServer::start(relay_addr, &[("a.txt", "a")], &[]).await;
    start_relay(relay, DropFirst::new()
        .kind(FrameKind::SynAck)
        .kind_from(FrameKind::Data, server.addr)
    );

    let mut client = client(relay_addr);
    let start = Instant::now();
    let response = client.send(&server.url("/a.txt"), get()).await.unwrap();
    let elapsed = start.elapsed();
    client.finish().await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"a");
    // one retransmission each for SYN and the response
    assert!(elapsed >= RETRANSMIT_TIMEOUT * 2, "{:?}", elapsed);
    assert!(elapsed < RETRANSMIT_TIMEOUT * 3, "{:?}", elapsed);
    assert_eq!(server.invocations(), 1);
    server.wait_until_idle().await;
}

#[tokio::test]
async fn test_lost_handshake_ack() {
    let (relay, relay_addr) = bind_relay().await;
    let server = TestServer::start(relay_addr, &[], &[]).await;
    start_relay(relay, DropFirst::new().nth(1, FrameKind::Ack, SeqBit::Zero));

    let mut client = client(relay_addr);
    let response = client.send(&server.url("/x.txt"), post("x")).await.unwrap();
    client.finish().await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(server.invocations(), 1);
    server.wait_until_idle().await;
}

#[tokio::test]
async fn test_lost_request_ack_and_response() {
    let (relay, relay_addr) = bind_relay().await;
    let server = TestServer::start(relay_addr, &[], &[]).await;
    start_relay(relay, DropFirst::new()
        .kind_from(FrameKind::Ack, server.addr)
        .kind_from(FrameKind::Data, server.addr)
    );

    // the client re-sends its request: the server must not write twice
    let mut client = client(relay_addr);
    let response = client.send(&server.url("/x.txt"), post("once")).await.unwrap();
    client.finish().await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(server.invocations(), 1);
    server.wait_until_idle().await;
}

#[tokio::test]
async fn test_lost_response_ack() {
    let (relay, relay_addr) = bind_relay().await;
    let server = TestServer::start(relay_addr, &[("a.txt", "a")], &[]).await;
    // the first ACK(1) is the server acknowledging the request, the second is the client's
    start_relay(relay, DropFirst::new().nth(2, FrameKind::Ack, SeqBit::One));

    let mut client = client(relay_addr);
    let response = client.send(&server.url("/a.txt"), get()).await.unwrap();
    assert_eq!(response.body().as_ref(), b"a");

    // the client's drain acknowledges the re-sent response, so the server's session ends
    client.finish().await;
    server.wait_until_idle().await;
    assert_eq!(server.invocations(), 1);
}

#[tokio::test]
async fn test_request_lost_for_longer_than_idle_timeout() {
    let (relay, relay_addr) = bind_relay().await;
    let mut config = transport_config(relay_addr);
    config.idle_timeout = RETRANSMIT_TIMEOUT + Duration::from_millis(200);
    let server = TestServer::start_with(config, &[("a.txt", "a")], &[]).await;
    // the server sends no DATA before it has the request, so these are all the client's
    start_relay(relay, DropFirst::new().first(3, FrameKind::Data, SeqBit::One));

    let mut client = client(relay_addr);
    let start = Instant::now();
    let response = timeout(Duration::from_secs(5), client.send(&server.url("/a.txt"), get())).await
        .expect("exchange did not complete")
        .unwrap();
    let elapsed = start.elapsed();
    client.finish().await;

    assert!(elapsed >= RETRANSMIT_TIMEOUT * 3, "{:?}", elapsed);
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"a");
    assert_eq!(server.invocations(), 1);
    server.wait_until_idle().await;
}

#[tokio::test]
async fn test_redirect_to_other_server() {
    let (relay, relay_addr) = bind_relay().await;
    let target = TestServer::start(relay_addr, &[("new.txt", "moved here")], &[]).await;
    let target_url = target.url("/new.txt").to_string();
    let origin = TestServer::start(relay_addr, &[], &[("/old.txt", target_url.as_str())]).await;
    start_relay(relay, NoFaults);

    let mut client = client(relay_addr);
    let response = client.send(&origin.url("/old.txt"), get()).await.unwrap();
    client.finish().await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"moved here");
    assert_eq!(origin.invocations(), 1);
    assert_eq!(target.invocations(), 1);
}

#[tokio::test]
async fn test_redirect_to_path() {
    let (relay, relay_addr) = bind_relay().await;
    let server = TestServer::start(relay_addr, &[("b.txt", "b")], &[("/a.txt", "/b.txt")]).await;
    start_relay(relay, NoFaults);

    let mut client = client(relay_addr);
    let response = client.send(&server.url("/a.txt"), get()).await.unwrap();
    client.finish().await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"b");
    assert_eq!(server.invocations(), 2);
}

#[tokio::test]
async fn test_redirect_loop_is_cut_short() {
    let (relay, relay_addr) = bind_relay().await;
    let server = TestServer::start(relay_addr, &[], &[("/loop", "/loop")]).await;
    start_relay(relay, NoFaults);

    let mut client = client(relay_addr);
    assert!(client.send(&server.url("/loop"), get()).await.is_err());
    client.finish().await;

    // the original request plus five redirects
    assert_eq!(server.invocations(), 6);
}

#[tokio::test]
async fn test_concurrent_clients_on_a_lossy_network() {
    let (relay, relay_addr) = bind_relay().await;
    let server = TestServer::start(relay_addr, &[], &[]).await;
    start_relay(relay, RandomFaults::new(0.2, 0.2, Duration::from_millis(50), Some(4711)).unwrap());

    let mut tasks = Vec::new();
    for i in 0..5 {
        let url = server.url(&format!("/file-{}.txt", i));
        tasks.push(tokio::spawn(async move {
            let mut client = client(relay_addr);
            let content = format!("content of file {}", i);

            let response = client.send(&url, request(Method::POST, content.clone())).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);

            let response = client.send(&url, get()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.body().as_ref(), content.as_bytes());

            client.finish().await;
        }));
    }

    for task in tasks {
        timeout(Duration::from_secs(60), task).await
            .expect("exchange did not complete")
            .unwrap();
    }
    assert_eq!(server.invocations(), 10);
}

#[tokio::test]
async fn test_response_parses_as_http() {
    let (relay, relay_addr) = bind_relay().await;
    let server = TestServer::start(relay_addr, &[], &[]).await;
    start_relay(relay, NoFaults);

    let mut client = client(relay_addr);
    let response = client.send(&server.url("/"), request(Method::PUT, Bytes::new())).await.unwrap();
    client.finish().await;

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.version(), Version::HTTP_10);
    assert_eq!(response.headers().get(CONTENT_LENGTH).unwrap(), "30");
    assert_eq!(response.body().as_ref(), b"HTTP method not supported: PUT");
}
