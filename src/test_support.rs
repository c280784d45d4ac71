//! In-process stand-in for the Wokwi simulator, plus in-memory websocket
//! pairs for driving the correlator directly.
//!
//! The mock keeps a tiny deterministic simulation per connection: time only
//! moves on `sim:resume { pauseAfter }`, serial output is a fixed greeting
//! followed by echoes of `serial-monitor:write`, and `control:set` drives the
//! pin levels that `pin:read` reports. A few `test:*` commands script failure
//! modes.

#![allow(clippy::cast_precision_loss, clippy::missing_panics_doc)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::http::header::{AUTHORIZATION, USER_AGENT};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::get;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::{SinkExt, StreamExt};
use protocol::{Command, ErrorFrame, Event, Frame, Hello, PROTOCOL_VERSION, Response};
use serde_json::{Value, json};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::Role;

use crate::config::ClientConfig;
use crate::events::{PIN_CHANGE_EVENT, SERIAL_DATA_EVENT, SIM_PAUSE_EVENT};

pub(crate) const TEST_TOKEN: &str = "test-token";
pub(crate) const SERVER_VERSION: &str = "1.2.3";
pub(crate) const SERIAL_GREETING: &[u8] = b"Hello, Wokwi!\n";
pub(crate) const FRAMEBUFFER_ID: &str = "lcd1";
pub(crate) const FRAMEBUFFER_PNG: &[u8] = b"\x89PNG\r\n\x1a\nmock-framebuffer";
pub(crate) const VCD_TEXT: &str = "$version Wokwi $end\n$timescale 1ns $end\n$var wire 1 ! CLK $end\n$enddefinitions $end\n#0\n0!\n#500\n1!\n#1000\n0!\n";

// =============================================================================
// RECORDED STATE
// =============================================================================

struct Recorded {
    files: HashMap<String, Vec<u8>>,
    commands: Vec<Command>,
    user_agents: Vec<String>,
    protocol_version: u32,
    vcd_samples: u64,
}

impl Default for Recorded {
    fn default() -> Self {
        Self {
            files: HashMap::new(),
            commands: Vec::new(),
            user_agents: Vec::new(),
            protocol_version: PROTOCOL_VERSION,
            vcd_samples: 3,
        }
    }
}

#[derive(Clone, Default)]
struct Shared(Arc<Mutex<Recorded>>);

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.0.lock().expect("mock state lock")
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// A mock simulator listening on an ephemeral localhost port.
pub(crate) struct MockServer {
    pub(crate) url: String,
    shared: Shared,
    task: JoinHandle<()>,
}

impl MockServer {
    pub(crate) async fn start() -> Self {
        let shared = Shared::default();
        let app = Router::new().route("/ws", get(upgrade)).with_state(shared.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { url: format!("ws://{addr}/ws"), shared, task }
    }

    pub(crate) fn config(&self) -> ClientConfig {
        ClientConfig::new(TEST_TOKEN)
            .with_server_url(&self.url)
            .with_connect_timeout(Duration::from_secs(5))
    }

    /// Names of every command received, in order, across connections.
    pub(crate) fn command_names(&self) -> Vec<String> {
        self.shared.lock().commands.iter().map(|c| c.command.clone()).collect()
    }

    /// Params of the most recent `command`.
    pub(crate) fn last_params(&self, command: &str) -> Option<Value> {
        self.shared
            .lock()
            .commands
            .iter()
            .rev()
            .find(|c| c.command == command)
            .map(|c| c.params.clone())
    }

    pub(crate) fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.shared.lock().files.get(name).cloned()
    }

    pub(crate) fn put_file(&self, name: &str, content: &[u8]) {
        self.shared.lock().files.insert(name.to_owned(), content.to_vec());
    }

    pub(crate) fn user_agents(&self) -> Vec<String> {
        self.shared.lock().user_agents.clone()
    }

    pub(crate) fn set_protocol_version(&self, version: u32) {
        self.shared.lock().protocol_version = version;
    }

    pub(crate) fn set_vcd_samples(&self, samples: u64) {
        self.shared.lock().vcd_samples = samples;
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn upgrade(State(shared): State<Shared>, headers: HeaderMap, ws: WebSocketUpgrade) -> HttpResponse {
    let expected = format!("Bearer {TEST_TOKEN}");
    if headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) != Some(expected.as_str()) {
        return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
    }
    if let Some(agent) = headers.get(USER_AGENT).and_then(|v| v.to_str().ok()) {
        shared.lock().user_agents.push(agent.to_owned());
    }
    ws.on_upgrade(move |socket| run_session(socket, shared))
}

// =============================================================================
// SESSION
// =============================================================================

#[derive(Default)]
struct Sim {
    nanos: u64,
    running: bool,
    serial: bool,
    levels: HashMap<(String, String), bool>,
    watched: HashSet<(String, String)>,
}

impl Sim {
    fn event(&self, name: &str, payload: Value) -> Frame {
        Frame::Event(Event { event: name.to_owned(), payload, nanos: self.nanos as f64, paused: !self.running })
    }
}

async fn run_session(mut socket: WebSocket, shared: Shared) {
    let hello = Frame::Hello(Hello {
        protocol_version: shared.lock().protocol_version,
        app_name: "wokwi-mock".to_owned(),
        app_version: SERVER_VERSION.to_owned(),
    });
    if send(&mut socket, &hello).await.is_err() {
        return;
    }

    let mut sim = Sim::default();
    while let Some(Ok(message)) = socket.recv().await {
        let text = match message {
            AxumMessage::Text(text) => text,
            AxumMessage::Close(_) => break,
            _ => continue,
        };
        let Ok(Frame::Command(command)) = protocol::decode_frame(text.as_str()) else {
            continue;
        };
        shared.lock().commands.push(command.clone());

        let Some(frames) = handle_command(&command, &mut sim, &shared) else {
            let _ = socket.send(AxumMessage::Close(None)).await;
            break;
        };
        for frame in &frames {
            if send(&mut socket, frame).await.is_err() {
                return;
            }
        }
    }
}

async fn send(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    socket.send(AxumMessage::Text(protocol::encode_frame(frame).into())).await
}

fn param_str<'a>(command: &'a Command, key: &str) -> &'a str {
    command.params.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Frames to send back, in order. `None` closes the connection.
fn handle_command(command: &Command, sim: &mut Sim, shared: &Shared) -> Option<Vec<Frame>> {
    let ok = |result: Value| Frame::Response(Response::ok(command, result));
    let failed = |code: i64, message: String| Frame::Response(Response::failed(command, code, message));

    let frames = match command.command.as_str() {
        "file:upload" => {
            let name = param_str(command, "name");
            match STANDARD.decode(param_str(command, "binary")) {
                Ok(content) => {
                    shared.lock().files.insert(name.to_owned(), content);
                    vec![ok(json!({}))]
                }
                Err(e) => vec![failed(400, format!("invalid base64: {e}"))],
            }
        }
        "file:download" => {
            let name = param_str(command, "name");
            match shared.lock().files.get(name) {
                Some(content) => vec![ok(json!({ "binary": STANDARD.encode(content) }))],
                None => vec![failed(404, format!("file not found: {name}"))],
            }
        }
        "sim:start" => {
            let firmware = param_str(command, "firmware");
            if !shared.lock().files.contains_key(firmware) {
                vec![failed(404, format!("firmware not found: {firmware}"))]
            } else {
                sim.nanos = 0;
                sim.running = !command.params.get("pause").and_then(Value::as_bool).unwrap_or(false);
                vec![ok(json!({}))]
            }
        }
        "sim:pause" => {
            sim.running = false;
            vec![sim.event(SIM_PAUSE_EVENT, json!({})), ok(json!({}))]
        }
        "sim:resume" => {
            sim.running = true;
            match command.params.get("pauseAfter").and_then(Value::as_u64) {
                Some(after) => {
                    sim.nanos += after;
                    sim.running = false;
                    vec![ok(json!({})), sim.event(SIM_PAUSE_EVENT, json!({}))]
                }
                None => vec![ok(json!({}))],
            }
        }
        "sim:restart" => {
            sim.nanos = 0;
            sim.running = !command.params.get("pause").and_then(Value::as_bool).unwrap_or(false);
            vec![ok(json!({}))]
        }
        "serial-monitor:listen" => {
            sim.serial = true;
            vec![ok(json!({})), sim.event(SERIAL_DATA_EVENT, json!({ "bytes": SERIAL_GREETING }))]
        }
        "serial-monitor:write" => {
            let bytes = command.params.get("bytes").cloned().unwrap_or_else(|| json!([]));
            let mut frames = vec![ok(json!({}))];
            if sim.serial {
                frames.push(sim.event(SERIAL_DATA_EVENT, json!({ "bytes": bytes })));
            }
            frames
        }
        "pin:read" => {
            let key = (param_str(command, "part").to_owned(), param_str(command, "pin").to_owned());
            if key.0.is_empty() {
                vec![failed(400, "part is required".to_owned())]
            } else {
                let value = sim.levels.get(&key).copied().unwrap_or(false);
                vec![ok(json!({ "pin": key.1, "value": value }))]
            }
        }
        "pin:listen" => {
            let key = (param_str(command, "part").to_owned(), param_str(command, "pin").to_owned());
            if command.params.get("listen").and_then(Value::as_bool).unwrap_or(true) {
                sim.watched.insert(key);
            } else {
                sim.watched.remove(&key);
            }
            vec![ok(json!({}))]
        }
        "gpio:list" => {
            let pins = sim
                .levels
                .iter()
                .map(|((part, pin), level)| (format!("{part}:{pin}"), json!(level)))
                .collect::<serde_json::Map<_, _>>();
            vec![ok(json!({ "pins": pins }))]
        }
        "control:set" => {
            let key = (param_str(command, "part").to_owned(), param_str(command, "control").to_owned());
            let level = command.params.get("value").and_then(Value::as_f64).unwrap_or(0.0) != 0.0;
            let mut frames = vec![ok(json!({}))];
            if sim.watched.contains(&key) {
                frames.push(sim.event(PIN_CHANGE_EVENT, json!({ "part": key.0, "pin": key.1, "value": level })));
            }
            sim.levels.insert(key, level);
            frames
        }
        "touch:event" => vec![ok(json!({}))],
        "framebuffer:read" => {
            if param_str(command, "id") == FRAMEBUFFER_ID {
                vec![ok(json!({ "png": STANDARD.encode(FRAMEBUFFER_PNG) }))]
            } else {
                vec![failed(404, "no framebuffer with that id".to_owned())]
            }
        }
        "sim:read-vcd" => {
            let samples = shared.lock().vcd_samples;
            vec![ok(json!({ "vcd": VCD_TEXT, "channelCount": 1, "sampleCount": samples }))]
        }
        "test:hold" => Vec::new(),
        "test:close" => return None,
        "test:fatal" => vec![Frame::Error(ErrorFrame { message: "simulator crashed".to_owned() })],
        "test:malformed" => vec![ok(json!("not an object"))],
        other => vec![failed(400, format!("unknown command: {other}"))],
    };
    Some(frames)
}

// =============================================================================
// IN-MEMORY PAIRS
// =============================================================================

pub(crate) type MemoryWs = WebSocketStream<DuplexStream>;

/// Client and server ends of a websocket over an in-memory pipe.
pub(crate) async fn ws_pair() -> (MemoryWs, MemoryWs) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
    let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
    (client, server)
}

pub(crate) async fn send_frame(ws: &mut MemoryWs, frame: &Frame) {
    ws.send(Message::Text(protocol::encode_frame(frame).into())).await.expect("send frame");
}

/// Next command the client wrote, skipping control frames.
pub(crate) async fn next_command(ws: &mut MemoryWs) -> Command {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a command")
            .expect("stream ended")
            .expect("receive failed");
        if let Message::Text(text) = message {
            match protocol::decode_frame(text.as_str()).expect("decode") {
                Frame::Command(command) => return command,
                other => panic!("expected a command, got {other:?}"),
            }
        }
    }
}

// =============================================================================
// CLIENT HELPERS
// =============================================================================

/// A client connected to `server`.
pub(crate) async fn connected(server: &MockServer) -> crate::WokwiClient {
    let client = crate::WokwiClient::new(server.config());
    client.connect().await.expect("connect to mock");
    client
}

/// A connected client with `firmware.bin` uploaded and the simulation running.
pub(crate) async fn running(server: &MockServer) -> crate::WokwiClient {
    server.put_file("firmware.bin", b"\x00fw");
    let client = connected(server).await;
    client
        .start_simulation(&crate::StartOptions::new("firmware.bin"))
        .await
        .expect("start simulation");
    client
}
