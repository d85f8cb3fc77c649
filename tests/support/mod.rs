#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::pending;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use conduit::protocol::{decode_outbound, OutboundMessage};
use conduit::transport::link::{OpenFuture, TransportPeer};
use conduit::transport::{
    ConnectRequest, ConnectionState, Connector, TransportError, TransportLink, TransportSignal,
};
use conduit::{
    ConnectionOrchestrator, ConnectionProfile, OrchestratorConfig, OrchestratorEvent,
    OrchestratorHandle, ServerInfo,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const ENDPOINT: &str = "ws://chat.test";

pub enum Outcome {
    Accept,
    Refuse(&'static str),
    Hang,
}

pub struct ScriptedConnector {
    outcomes: Mutex<VecDeque<Outcome>>,
    attempts: AtomicUsize,
    requests: Mutex<Vec<ConnectRequest>>,
    peers: mpsc::UnboundedSender<TransportPeer>,
}

impl Connector for ScriptedConnector {
    fn open(&self, request: &ConnectRequest) -> OpenFuture {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        lock_unpoisoned(&self.requests).push(request.clone());
        let outcome = lock_unpoisoned(&self.outcomes)
            .pop_front()
            .unwrap_or(Outcome::Refuse("connection refused"));

        match outcome {
            Outcome::Accept => {
                let (link, peer) = TransportLink::pair();
                let _ = self.peers.send(peer);
                Box::pin(async move { Ok(link) })
            }
            Outcome::Refuse(reason) => {
                Box::pin(async move { Err(TransportError::Open(reason.to_owned())) })
            }
            Outcome::Hang => Box::pin(pending()),
        }
    }
}

/// Server side of one scripted socket session.
pub struct Peer {
    inner: TransportPeer,
}

impl Peer {
    pub fn send(&self, text: &str) {
        let _ = self
            .inner
            .inbound
            .send(TransportSignal::Frame(text.to_owned()));
    }

    pub fn close(&self, reason: &str) {
        let _ = self
            .inner
            .inbound
            .send(TransportSignal::Closed(reason.to_owned()));
    }

    /// Next non-ping frame the client wrote.
    pub async fn next_frame(&mut self) -> OutboundMessage {
        loop {
            let text = timeout(Duration::from_secs(3_600), self.inner.outbound.recv())
                .await
                .expect("frame before timeout")
                .expect("outbound channel open");
            let message = decode_outbound(&text).expect("client frames decode");
            if message != OutboundMessage::Ping {
                return message;
            }
        }
    }

    /// Non-ping frames already written, without waiting.
    pub fn written_frames(&mut self) -> Vec<OutboundMessage> {
        let mut frames = Vec::new();
        while let Ok(text) = self.inner.outbound.try_recv() {
            let message = decode_outbound(&text).expect("client frames decode");
            if message != OutboundMessage::Ping {
                frames.push(message);
            }
        }
        frames
    }
}

pub struct Harness {
    pub handle: OrchestratorHandle,
    pub events: mpsc::UnboundedReceiver<OrchestratorEvent>,
    peers: mpsc::UnboundedReceiver<TransportPeer>,
    connector: Arc<ScriptedConnector>,
    _task: JoinHandle<()>,
}

impl Harness {
    pub fn socket(outcomes: Vec<Outcome>) -> Self {
        Self::with_profile(ConnectionProfile::socket(ENDPOINT), outcomes)
    }

    pub fn with_profile(profile: ConnectionProfile, outcomes: Vec<Outcome>) -> Self {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(ScriptedConnector {
            outcomes: Mutex::new(outcomes.into()),
            attempts: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            peers: peer_tx,
        });
        let (handle, events, task) = ConnectionOrchestrator::spawn_with_connector(
            profile,
            OrchestratorConfig::default(),
            Arc::clone(&connector) as Arc<dyn Connector>,
        )
        .expect("valid profile");

        Self {
            handle,
            events,
            peers: peer_rx,
            connector,
            _task: task,
        }
    }

    pub fn attempts(&self) -> usize {
        self.connector.attempts.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        lock_unpoisoned(&self.connector.requests).clone()
    }

    pub async fn next_event(&mut self) -> OrchestratorEvent {
        timeout(Duration::from_secs(3_600), self.events.recv())
            .await
            .expect("event before timeout")
            .expect("event channel open")
    }

    /// Skips events until `select` picks one.
    pub async fn wait_for<T>(&mut self, mut select: impl FnMut(OrchestratorEvent) -> Option<T>) -> T {
        loop {
            if let Some(value) = select(self.next_event().await) {
                return value;
            }
        }
    }

    pub async fn wait_for_state(&mut self, expected: ConnectionState) {
        self.wait_for(|event| match event {
            OrchestratorEvent::ConnectionChanged(state) if state == expected => Some(()),
            _ => None,
        })
        .await;
    }

    pub async fn next_peer(&mut self) -> Peer {
        let inner = timeout(Duration::from_secs(3_600), self.peers.recv())
            .await
            .expect("peer before timeout")
            .expect("peer channel open");
        Peer { inner }
    }

    /// Completes the handshake on the next accepted session.
    pub async fn handshake(&mut self) -> Peer {
        let peer = self.next_peer().await;
        peer.send(r#"{"type":"hello","server":"test","version":"1","capabilities":["tools"]}"#);
        self.wait_for_state(ConnectionState::Ready).await;
        let info = self
            .wait_for(|event| match event {
                OrchestratorEvent::ServerHello(info) => Some(info),
                _ => None,
            })
            .await;
        assert_eq!(
            info,
            ServerInfo {
                server: "test".to_owned(),
                version: "1".to_owned(),
                capabilities: vec!["tools".to_owned()],
            }
        );
        peer
    }

    pub async fn connect_ready(&mut self) -> Peer {
        self.handle.connect().expect("connect");
        self.wait_for_state(ConnectionState::Connecting).await;
        self.handshake().await
    }

    /// Drains whatever is queued right now.
    pub fn pending_events(&mut self) -> Vec<OrchestratorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One HTTP response written in timed pieces.
#[derive(Clone)]
pub struct ScriptedResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub chunks: Vec<(u64, Vec<u8>)>,
}

pub fn sse_response(frames: &[&str]) -> ScriptedResponse {
    ScriptedResponse {
        status: 200,
        content_type: "text/event-stream",
        chunks: frames
            .iter()
            .map(|frame| (0, format!("data: {frame}\n\n").into_bytes()))
            .collect(),
    }
}

pub fn content_delta(content: &str) -> String {
    serde_json::json!({ "choices": [{ "delta": { "content": content } }] }).to_string()
}

/// Local completions server answering requests with `scripts` in order.
pub struct CompletionServer {
    pub base_url: String,
    pub bodies: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl CompletionServer {
    pub async fn start(scripts: Vec<ScriptedResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("local TCP listener should bind");
        let addr = listener.local_addr().expect("listener address");
        let scripts = Arc::new(Mutex::new(VecDeque::from(scripts)));
        let bodies = Arc::new(Mutex::new(Vec::new()));

        let handle = tokio::spawn({
            let bodies = Arc::clone(&bodies);
            async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let script = lock_unpoisoned(&scripts).pop_front();
                    let bodies = Arc::clone(&bodies);
                    tokio::spawn(async move {
                        if let Some(script) = script {
                            serve_one(socket, script, bodies).await;
                        }
                    });
                }
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            bodies,
            handle,
        }
    }

    pub fn request_count(&self) -> usize {
        lock_unpoisoned(&self.bodies).len()
    }
}

impl Drop for CompletionServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_one(mut socket: TcpStream, script: ScriptedResponse, bodies: Arc<Mutex<Vec<String>>>) {
    let Some(body) = read_request_body(&mut socket).await else {
        return;
    };
    lock_unpoisoned(&bodies).push(body);

    let head = format!(
        "HTTP/1.1 {} OK\r\ncontent-type: {}\r\nconnection: close\r\n\r\n",
        script.status, script.content_type
    );
    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    for (delay_ms, bytes) in script.chunks {
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if socket.write_all(&bytes).await.is_err() {
            return;
        }
        let _ = socket.flush().await;
    }
    let _ = socket.shutdown().await;
}

async fn read_request_body(socket: &mut TcpStream) -> Option<String> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];
    let header_end = loop {
        let read = socket.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(position) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            break position + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buffer.len() < header_end + content_length {
        let read = socket.read(&mut chunk).await.ok()?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
    Some(String::from_utf8_lossy(&buffer[header_end..]).into_owned())
}
