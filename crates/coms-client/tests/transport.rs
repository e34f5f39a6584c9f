//! End-to-end tests against an in-process websocket server.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{WebSocketStream, accept_async, accept_hdr_async};
use tracing::Level;

use coms_client::{
    BroadcastEvent, Call, CallEvent, Client, ClientConfig, ClientError, ConnectionState, Envelope,
    ErrorInfo, EventKind, PendingPolicy, Status, TransactionId, handler,
};
use coms_core::codec::{decode, encode};
use coms_core::logging::capture_logs;

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(100);

// ── Test server ──

struct TestServer {
    endpoint: String,
    peers: mpsc::UnboundedReceiver<Peer>,
}

/// Server side of one accepted connection.
struct Peer {
    ws: WebSocketStream<TcpStream>,
    path: String,
}

impl Peer {
    async fn recv(&mut self) -> Envelope {
        loop {
            let msg = timeout(TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("client hung up")
                .expect("websocket error");
            if let Message::Binary(data) = msg {
                return decode(&data).expect("client sent a malformed envelope");
            }
        }
    }

    async fn send(&mut self, envelope: &Envelope) {
        self.ws
            .send(Message::Binary(encode(envelope).unwrap()))
            .await
            .unwrap();
    }

    async fn send_raw(&mut self, frame: Message) {
        self.ws.send(frame).await.unwrap();
    }

    async fn close(mut self) {
        self.ws.close(None).await.unwrap();
    }
}

impl TestServer {
    async fn accept(&mut self) -> Peer {
        timeout(TIMEOUT, self.peers.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("server stopped")
    }
}

async fn boot_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    drop(tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let mut path = String::new();
            let record_path = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                path = req.uri().path().to_string();
                Ok(resp)
            };
            let Ok(ws) = accept_hdr_async(stream, record_path).await else {
                continue;
            };
            if tx.send(Peer { ws, path }).is_err() {
                break;
            }
        }
    }));

    TestServer {
        endpoint: format!("http://{addr}/"),
        peers: rx,
    }
}

async fn connected(server: &mut TestServer, config: ClientConfig) -> (Client, Peer) {
    let client = Client::new(config);
    client.set_endpoint(&server.endpoint).unwrap();
    client.connect(None).await.unwrap();
    let peer = server.accept().await;
    (client, peer)
}

fn record(client: &Client, kind: EventKind) -> mpsc::UnboundedReceiver<BroadcastEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.subscribe(
        kind,
        handler(move |event| {
            let _ = tx.send(event.clone());
        }),
    );
    rx
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<BroadcastEvent>) -> BroadcastEvent {
    timeout(TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("dispatcher dropped")
}

async fn outcome(call: Call) -> Result<Envelope, ClientError> {
    timeout(TIMEOUT, call.outcome())
        .await
        .expect("timed out waiting for an outcome")
}

fn request(payload_type: &str) -> Envelope {
    Envelope::request(payload_type, Bytes::new())
}

// ── Correlation ──

#[tokio::test]
async fn ids_increase_and_reversed_replies_correlate() {
    let mut server = boot_server().await;
    let (client, mut peer) = connected(&mut server, ClientConfig::default()).await;

    let a = client.call(request("A")).unwrap();
    let b = client.call(request("B")).unwrap();
    assert_eq!(a.id(), TransactionId::new(1));
    assert_eq!(b.id(), TransactionId::new(2));

    let first = peer.recv().await;
    let second = peer.recv().await;
    assert_eq!((first.id.get(), first.payload_type.as_str()), (1, "A"));
    assert_eq!((second.id.get(), second.payload_type.as_str()), (2, "B"));

    peer.send(&Envelope::complete(second.id, "B", &b"for B"[..])).await;
    peer.send(&Envelope::complete(first.id, "A", &b"for A"[..])).await;

    assert_eq!(outcome(b).await.unwrap().payload, &b"for B"[..]);
    assert_eq!(outcome(a).await.unwrap().payload, &b"for A"[..]);
    assert!(client.pending().is_empty());
}

#[tokio::test]
async fn progress_then_complete() {
    let mut server = boot_server().await;
    let (client, mut peer) = connected(&mut server, ClientConfig::default()).await;

    // two untracked sends consume ids 1 and 2
    let _ = client.send_no_wait(request("Warmup")).unwrap();
    let _ = client.send_no_wait(request("Warmup")).unwrap();
    let _ = peer.recv().await;
    let _ = peer.recv().await;

    let mut call = client.call(request("Run")).unwrap();
    assert_eq!(call.id(), TransactionId::new(3));
    let sent = peer.recv().await;
    assert_eq!(sent.id, call.id());

    for step in ["10", "50"] {
        peer.send(&Envelope::progress(sent.id, "Run", step.as_bytes().to_vec()))
            .await;
    }
    peer.send(&Envelope::complete(sent.id, "Run", &b"done"[..])).await;

    let mut events = Vec::new();
    while let Some(event) = timeout(TIMEOUT, call.recv()).await.unwrap() {
        events.push(event);
    }
    assert_matches!(&events[..], [
        CallEvent::Progress(p1),
        CallEvent::Progress(p2),
        CallEvent::Complete(done),
    ] if p1.payload == &b"10"[..] && p2.payload == &b"50"[..] && done.payload == &b"done"[..]);
}

#[tokio::test]
async fn send_reports_progress_through_callback() {
    let mut server = boot_server().await;
    let (client, mut peer) = connected(&mut server, ClientConfig::default()).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_by_callback = seen.clone();
    let (result, ()) = tokio::join!(
        client.send(request("Install"), move |p| {
            seen_by_callback.lock().push(p.payload.clone());
        }),
        async {
            let req = peer.recv().await;
            peer.send(&Envelope::progress(req.id, "Install", &b"half"[..])).await;
            peer.send(&Envelope::complete(req.id, "Install", &b"ok"[..])).await;
        }
    );

    assert_eq!(result.unwrap().status, Status::Complete);
    assert_eq!(*seen.lock(), vec![Bytes::from_static(b"half")]);
}

#[tokio::test]
async fn error_reply_rejects_with_cause() {
    let mut server = boot_server().await;
    let (client, mut peer) = connected(&mut server, ClientConfig::default()).await;

    let info = ErrorInfo::new("Unable to install module", "permission denied");
    let reply = info.clone();
    let (result, ()) = tokio::join!(client.send(request("Install"), |_| {}), async {
        let req = peer.recv().await;
        peer.send(&Envelope::failure(req.id, reply)).await;
    });

    assert_eq!(result, Err(ClientError::Transaction(info)));
    assert!(client.pending().is_empty());
}

// ── Broadcasts ──

#[tokio::test]
async fn broadcast_reaches_every_subscriber() {
    let mut server = boot_server().await;
    let (client, mut peer) = connected(&mut server, ClientConfig::default()).await;
    let mut first = record(&client, EventKind::Broadcast);
    let mut second = record(&client, EventKind::Broadcast);

    let call = client.call(request("Long")).unwrap();
    let _ = peer.recv().await;

    let event = Envelope::broadcast("ModuleInstalled", &b"jmv"[..]);
    peer.send(&event).await;

    assert_eq!(next_event(&mut first).await, BroadcastEvent::Broadcast(event.clone()));
    assert_eq!(next_event(&mut second).await, BroadcastEvent::Broadcast(event));
    assert_eq!(client.pending(), vec![call.id()]);
}

#[tokio::test]
async fn unmatched_and_untracked_replies_are_broadcast() {
    let mut server = boot_server().await;
    let (client, mut peer) = connected(&mut server, ClientConfig::default()).await;
    let mut broadcasts = record(&client, EventKind::Broadcast);

    let id = client.send_no_wait(request("Fire")).unwrap();
    let sent = peer.recv().await;
    assert_eq!(sent.id, id);
    assert!(client.pending().is_empty());

    peer.send(&Envelope::complete(id, "Fire", &b"reply"[..])).await;
    peer.send(&Envelope::complete(TransactionId::new(99), "Stray", &b""[..]))
        .await;

    assert_matches!(
        next_event(&mut broadcasts).await,
        BroadcastEvent::Broadcast(e) if e.id == id
    );
    assert_matches!(
        next_event(&mut broadcasts).await,
        BroadcastEvent::Broadcast(e) if e.id.get() == 99
    );
}

#[tokio::test]
async fn unsubscribed_handler_stops_receiving() {
    let mut server = boot_server().await;
    let (client, mut peer) = connected(&mut server, ClientConfig::default()).await;
    let mut kept = record(&client, EventKind::Broadcast);

    let dropped_count = Arc::new(Mutex::new(0_usize));
    let counter = dropped_count.clone();
    let removed = handler(move |_| *counter.lock() += 1);
    client.subscribe(EventKind::Broadcast, removed.clone());
    assert!(client.unsubscribe(EventKind::Broadcast, &removed));

    peer.send(&Envelope::broadcast("Tick", &b""[..])).await;
    let _ = next_event(&mut kept).await;
    assert_eq!(*dropped_count.lock(), 0);
}

#[tokio::test]
async fn malformed_and_text_frames_are_dropped() {
    let (logs, _guard) = capture_logs();
    let mut server = boot_server().await;
    let (client, mut peer) = connected(&mut server, ClientConfig::default()).await;
    let mut broadcasts = record(&client, EventKind::Broadcast);
    let call = client.call(request("Pending")).unwrap();
    let _ = peer.recv().await;

    peer.send_raw(Message::Binary(Bytes::from_static(&[0x01, 0x02, 0x03])))
        .await;
    peer.send_raw(Message::Text("not an envelope".into())).await;
    peer.send(&Envelope::broadcast("After", &b""[..])).await;

    // frames are handled in order, so the broadcast proves the others were seen
    assert_matches!(
        next_event(&mut broadcasts).await,
        BroadcastEvent::Broadcast(e) if e.payload_type == "After"
    );
    assert!(logs.has_event(Level::WARN, "dropping malformed envelope"));
    assert!(logs.has_event(Level::DEBUG, "ignoring text frame"));
    assert_eq!(client.pending(), vec![call.id()]);
    assert_eq!(client.state(), ConnectionState::Open);
}

// ── Connection lifecycle ──

#[tokio::test]
async fn concurrent_connects_share_one_transport() {
    let mut server = boot_server().await;
    let client = Client::new(ClientConfig::default());
    client.set_endpoint(&server.endpoint).unwrap();

    let (first, second) = tokio::join!(client.connect(None), client.connect(None));
    assert_eq!(first, Ok(()));
    assert_eq!(second, Ok(()));
    assert_eq!(client.state(), ConnectionState::Open);

    // connecting again once open is a no-op
    assert_eq!(client.connect(None).await, Ok(()));

    let _peer = server.accept().await;
    assert!(timeout(QUIET, server.peers.recv()).await.is_err());
}

#[tokio::test]
async fn resource_and_token_form_the_path() {
    let mut server = boot_server().await;
    let client = Client::new(ClientConfig {
        resource: Some("coms".into()),
        ..ClientConfig::default()
    });
    let mut opens = record(&client, EventKind::Open);
    client.set_endpoint(&server.endpoint).unwrap();
    client.connect(Some("session-1")).await.unwrap();

    let peer = server.accept().await;
    assert_eq!(peer.path, "/coms/session-1");
    assert_matches!(
        next_event(&mut opens).await,
        BroadcastEvent::Open { url } if url.ends_with("/coms/session-1")
    );
}

#[tokio::test]
async fn handshake_failure_is_shared_by_later_connects() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let client = Client::new(ClientConfig::default());
    client.set_endpoint(&format!("http://{addr}/")).unwrap();

    let first = client.connect(None).await;
    assert_matches!(&first, Err(ClientError::Transport { .. }));
    assert_eq!(client.state(), ConnectionState::Connecting);
    assert_eq!(client.connect(None).await, first);
}

#[tokio::test]
async fn concurrent_connects_share_handshake_failure() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let client = Client::new(ClientConfig::default());
    client.set_endpoint(&format!("http://{addr}/")).unwrap();

    let (first, second) = tokio::join!(client.connect(None), client.connect(None));
    assert_matches!(&first, Err(ClientError::Transport { .. }));
    assert_eq!(first, second);
    assert_eq!(client.connect(None).await, first);
}

#[tokio::test]
async fn dropping_client_during_handshake_hangs_up() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // hold the handshake long enough for the client to give up and drop
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut ws = accept_async(stream).await.unwrap();
        timeout(Duration::from_secs(2), async {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await
        .is_ok()
    });

    let client = Client::new(ClientConfig::default());
    client.set_endpoint(&format!("http://{addr}/")).unwrap();
    assert!(timeout(Duration::from_millis(50), client.connect(None)).await.is_err());
    drop(client);

    assert!(
        timeout(TIMEOUT, server).await.unwrap().unwrap(),
        "client kept the socket open after being dropped"
    );
}

#[tokio::test]
async fn ready_resolves_once_endpoint_is_set() {
    let server = boot_server().await;
    let client = Client::new(ClientConfig::default());

    let waiter = {
        let client = client.clone();
        tokio::spawn(async move { client.ready().await })
    };
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    client.set_endpoint(&server.endpoint).unwrap();
    timeout(TIMEOUT, waiter).await.unwrap().unwrap();
    assert_eq!(client.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn peer_close_leaves_pending_calls_unsettled() {
    let mut server = boot_server().await;
    let (client, mut peer) = connected(&mut server, ClientConfig::default()).await;
    let mut closes = record(&client, EventKind::Close);

    let a = client.call(request("A")).unwrap();
    let b = client.call(request("B")).unwrap();
    let _ = peer.recv().await;
    let _ = peer.recv().await;
    peer.close().await;

    assert_matches!(next_event(&mut closes).await, BroadcastEvent::Close(_));
    assert!(timeout(QUIET, closes.recv()).await.is_err(), "close published twice");
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(client.pending(), vec![a.id(), b.id()]);
    assert!(timeout(QUIET, a.outcome()).await.is_err());
    assert!(timeout(QUIET, b.outcome()).await.is_err());

    assert_matches!(client.call(request("C")), Err(ClientError::Closed));
    assert_eq!(client.connect(None).await, Err(ClientError::Closed));
}

#[tokio::test]
async fn peer_close_rejects_pending_calls_when_configured() {
    let mut server = boot_server().await;
    let config = ClientConfig {
        pending_on_close: PendingPolicy::Reject,
        ..ClientConfig::default()
    };
    let (client, mut peer) = connected(&mut server, config).await;

    let a = client.call(request("A")).unwrap();
    let id = a.id();
    let _ = peer.recv().await;
    peer.close().await;

    assert_eq!(outcome(a).await, Err(ClientError::TransportClosed { id }));
    assert!(client.pending().is_empty());
}

#[tokio::test]
async fn explicit_close_publishes_close_once() {
    let mut server = boot_server().await;
    let (client, _peer) = connected(&mut server, ClientConfig::default()).await;
    let mut closes = record(&client, EventKind::Close);

    timeout(TIMEOUT, client.close()).await.unwrap().unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_matches!(
        next_event(&mut closes).await,
        BroadcastEvent::Close(info) if info.code == Some(1000)
    );

    assert_eq!(client.close().await, Ok(()));
    assert!(timeout(QUIET, closes.recv()).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_returns_after_close_path_has_run() {
    let mut server = boot_server().await;
    let config = ClientConfig {
        pending_on_close: PendingPolicy::Reject,
        ..ClientConfig::default()
    };
    let (client, mut peer) = connected(&mut server, config).await;

    let handled = Arc::new(AtomicBool::new(false));
    let flag = handled.clone();
    client.subscribe(
        EventKind::Close,
        handler(move |_| {
            std::thread::sleep(Duration::from_millis(200));
            flag.store(true, Ordering::SeqCst);
        }),
    );

    let a = client.call(request("A")).unwrap();
    let id = a.id();
    let _ = peer.recv().await;

    timeout(TIMEOUT, client.close()).await.unwrap().unwrap();
    assert!(handled.load(Ordering::SeqCst), "close returned before close subscribers ran");
    assert!(client.pending().is_empty());
    assert_eq!(outcome(a).await, Err(ClientError::TransportClosed { id }));

    // a second close after a finished close path returns at once
    timeout(QUIET, client.close()).await.unwrap().unwrap();
}

#[tokio::test]
async fn oversize_request_is_withdrawn() {
    let mut server = boot_server().await;
    let config = ClientConfig {
        max_envelope_bytes: 1024,
        ..ClientConfig::default()
    };
    let (client, mut peer) = connected(&mut server, config).await;

    let big = Envelope::request("Big", vec![0_u8; 2048]);
    assert_matches!(client.call(big), Err(ClientError::Codec(_)));
    assert!(client.pending().is_empty());

    // the withdrawn id is not reused
    let next = client.call(request("Small")).unwrap();
    assert_eq!(next.id(), TransactionId::new(2));
    assert_eq!(peer.recv().await.id, next.id());
}
