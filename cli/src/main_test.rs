use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response as HttpResponse;
use axum::routing::get;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::CommandFactory;
use protocol::{Command as WireCommand, Event, Frame, Hello, PROTOCOL_VERSION, Response};
use serde_json::{Value, json};

use super::*;

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("wokwi-cli").chain(args.iter().copied())).expect("parse")
}

#[test]
fn command_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn bare_invocation_has_no_subcommand() {
    let cli = parse(&[]);
    assert!(cli.command.is_none());
    assert_eq!(cli.verbose, 0);
}

#[test]
fn version_flag_reports_package_version() {
    let err = Cli::try_parse_from(["wokwi-cli", "--version"]).expect_err("version exits early");
    assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    let rendered = err.to_string();
    assert!(rendered.contains("wokwi-cli"));
    assert!(rendered.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn run_defaults() {
    let cli = parse(&["--token", "t", "run", "--firmware", "build/firmware.bin"]);
    let Some(Command::Run(args)) = cli.command else { panic!("expected run") };
    assert_eq!(args.diagram, PathBuf::from("diagram.json"));
    assert_eq!(args.firmware, PathBuf::from("build/firmware.bin"));
    assert!((args.timeout - 10.0).abs() < f64::EPSILON);
    assert!(args.chips.is_empty());
    assert_eq!(cli.token.as_deref(), Some("t"));
}

#[test]
fn run_collects_repeated_chips_and_verbosity() {
    let cli = parse(&["run", "--firmware", "fw.bin", "--chip", "chips/inverter", "--chip", "chips/and", "-vv"]);
    let Some(Command::Run(args)) = cli.command else { panic!("expected run") };
    assert_eq!(args.chips, vec![PathBuf::from("chips/inverter"), PathBuf::from("chips/and")]);
    assert_eq!(cli.verbose, 2);
}

#[test]
fn screenshot_part_requires_file() {
    let result = Cli::try_parse_from(["wokwi-cli", "run", "--firmware", "fw.bin", "--screenshot-part", "lcd1"]);
    assert!(result.is_err());
}

#[test]
fn upload_name_uses_file_name() {
    assert_eq!(upload_name(Path::new("build/app.elf")).expect("name"), "app.elf");
    assert!(matches!(upload_name(Path::new("/")), Err(CliError::InvalidPath(_))));
}

// =============================================================================
// SIMULATOR
// =============================================================================

const BOOT_BANNER: &str = "rst:0x1 (POWERON_RESET),boot:0x13\nhello from app_main\n";
const SCREEN_PNG: &[u8] = b"\x89PNG\r\n\x1a\ncli-screen";

type Log = Arc<Mutex<Vec<WireCommand>>>;

/// Scripted simulator: serial output appears right after `sim:start`, and
/// time only advances through `sim:resume { pauseAfter }`.
struct Simulator {
    url: String,
    log: Log,
    task: tokio::task::JoinHandle<()>,
}

impl Simulator {
    async fn start() -> Self {
        let log = Log::default();
        let app = Router::new().route("/ws", get(upgrade)).with_state(Arc::clone(&log));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { url: format!("ws://{addr}/ws"), log, task }
    }

    fn config(&self) -> ClientConfig {
        ClientConfig::new("cli-token").with_server_url(&self.url)
    }

    fn names(&self) -> Vec<String> {
        self.log.lock().expect("log").iter().map(|c| c.command.clone()).collect()
    }

    fn params(&self, command: &str) -> Vec<Value> {
        self.log.lock().expect("log").iter().filter(|c| c.command == command).map(|c| c.params.clone()).collect()
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn upgrade(State(log): State<Log>, ws: WebSocketUpgrade) -> HttpResponse {
    ws.on_upgrade(move |socket| session(socket, log))
}

#[allow(clippy::cast_precision_loss)]
async fn session(mut socket: WebSocket, log: Log) {
    let hello = Frame::Hello(Hello {
        protocol_version: PROTOCOL_VERSION,
        app_name: "cli-mock".to_owned(),
        app_version: "0.0.1".to_owned(),
    });
    if send(&mut socket, &hello).await.is_err() {
        return;
    }

    let mut nanos = 0_u64;
    while let Some(Ok(Message::Text(text))) = socket.recv().await {
        let Ok(Frame::Command(command)) = protocol::decode_frame(text.as_str()) else {
            continue;
        };
        log.lock().expect("log").push(command.clone());

        let ok = |result: Value| Frame::Response(Response::ok(&command, result));
        let event = |name: &str, nanos: u64, payload: Value| {
            Frame::Event(Event { event: name.to_owned(), payload, nanos: nanos as f64, paused: name == "sim:pause" })
        };
        let frames = match command.command.as_str() {
            "sim:start" => vec![ok(json!({})), event("serial-monitor:data", 0, json!({ "bytes": BOOT_BANNER.as_bytes() }))],
            "sim:pause" => vec![event("sim:pause", nanos, json!({})), ok(json!({}))],
            "sim:resume" => {
                nanos += command.params.get("pauseAfter").and_then(Value::as_u64).unwrap_or(0);
                vec![ok(json!({})), event("sim:pause", nanos, json!({}))]
            }
            "sim:read-vcd" => {
                vec![ok(json!({ "vcd": "$timescale 1ns $end\n#0\n1!\n", "channelCount": 1, "sampleCount": 1 }))]
            }
            "framebuffer:read" => vec![ok(json!({ "png": STANDARD.encode(SCREEN_PNG) }))],
            _ => vec![ok(json!({}))],
        };
        for frame in &frames {
            if send(&mut socket, frame).await.is_err() {
                return;
            }
        }
    }
}

async fn send(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    socket.send(Message::Text(protocol::encode_frame(frame).into())).await
}

/// An ESP-IDF style project on disk with an ELF and one custom chip.
fn project(dir: &Path) -> RunArgs {
    std::fs::write(dir.join("diagram.json"), r#"{"version":1,"parts":[]}"#).expect("diagram");
    std::fs::create_dir(dir.join("build")).expect("build dir");
    std::fs::write(dir.join("build/app.bin"), [0xE9, 0x01]).expect("app");
    std::fs::write(dir.join("build/flasher_args.json"), r#"{"flash_files": {"0x10": "app.bin"}}"#).expect("args");
    std::fs::write(dir.join("app.elf"), b"\x7fELF").expect("elf");
    std::fs::create_dir(dir.join("chips")).expect("chips dir");
    std::fs::write(dir.join("chips/inverter.chip.json"), "{}").expect("chip json");
    std::fs::write(dir.join("chips/inverter.chip.bin"), b"\0asm").expect("chip bin");

    RunArgs {
        diagram: dir.join("diagram.json"),
        firmware: dir.join("build/flasher_args.json"),
        elf: Some(dir.join("app.elf")),
        chips: vec![dir.join("chips/inverter")],
        timeout: 0.5,
        expect_text: None,
        vcd: None,
        screenshot_part: None,
        screenshot_file: None,
    }
}

// =============================================================================
// RUN
// =============================================================================

#[tokio::test]
async fn run_uploads_project_and_runs_for_the_requested_time() {
    let sim = Simulator::start().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mut args = project(dir.path());
    args.expect_text = Some("hello from app_main".to_owned());
    args.vcd = Some(dir.path().join("out/capture.vcd"));
    args.screenshot_part = Some("lcd1".to_owned());
    args.screenshot_file = Some(dir.path().join("out/screen.png"));

    run(sim.config(), args).await.expect("run");

    let uploads = sim.params("file:upload");
    let names = uploads.iter().map(|p| p["name"].as_str().unwrap_or_default()).collect::<Vec<_>>();
    assert_eq!(names, ["diagram.json", "firmware.bin", "app.elf", "inverter.chip.json", "inverter.chip.bin"]);

    let image = STANDARD.decode(uploads[1]["binary"].as_str().expect("binary")).expect("base64");
    assert_eq!(image.len(), 0x12);
    assert!(image[..0x10].iter().all(|&b| b == 0xFF));
    assert_eq!(&image[0x10..], [0xE9, 0x01]);

    let start = &sim.params("sim:start")[0];
    assert_eq!(start["firmware"], "firmware.bin");
    assert_eq!(start["elf"], "app.elf");
    assert_eq!(start["chips"], json!(["inverter"]));
    assert_eq!(sim.params("sim:resume")[0]["pauseAfter"], 500_000_000);

    let order = sim.names();
    let position = |name: &str| order.iter().position(|c| c == name).expect(name);
    assert!(position("serial-monitor:listen") < position("sim:start"));

    let vcd = std::fs::read_to_string(dir.path().join("out/capture.vcd")).expect("vcd");
    assert!(vcd.contains("$timescale"));
    assert_eq!(std::fs::read(dir.path().join("out/screen.png")).expect("png"), SCREEN_PNG);
}

#[tokio::test]
async fn run_fails_when_expected_text_never_appears() {
    let sim = Simulator::start().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mut args = project(dir.path());
    args.expect_text = Some("TEST PASSED".to_owned());

    let err = run(sim.config(), args).await.expect_err("missing text");
    assert!(matches!(err, CliError::ExpectedTextMissing(text) if text == "TEST PASSED"));
}

#[tokio::test]
async fn run_rejects_negative_time_before_connecting() {
    let sim = Simulator::start().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mut args = project(dir.path());
    args.timeout = -1.0;

    assert!(matches!(run(sim.config(), args).await, Err(CliError::InvalidTimeout(_))));
    assert!(sim.names().is_empty());
}

#[tokio::test]
async fn missing_chip_file_is_reported() {
    let sim = Simulator::start().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mut args = project(dir.path());
    args.chips = vec![dir.path().join("chips/missing")];

    let err = run(sim.config(), args).await.expect_err("missing chip");
    assert!(matches!(err, CliError::Client(ClientError::Validation(msg)) if msg.contains("missing.chip.json")));
    assert!(!sim.names().contains(&"sim:start".to_owned()));
}
