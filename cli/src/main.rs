use std::path::{Path, PathBuf};

use clap::{ArgAction, Args, Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tracing::{Level, info};
use wokwi_client::{ClientConfig, ClientError, DEFAULT_WS_URL, GET_TOKEN_URL, SerialMonitor, StartOptions, WokwiClient};

const GREETING: &str = "Hello Virtual World!";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing API token; pass --token or set WOKWI_CLI_TOKEN (get one from {GET_TOKEN_URL})")]
    MissingToken,
    #[error("{0}")]
    Client(#[from] ClientError),
    #[error("cannot derive an upload name from {0}")]
    InvalidPath(PathBuf),
    #[error("invalid simulation time: {0}")]
    InvalidTimeout(f64),
    #[error("expected text {0:?} not found in serial output")]
    ExpectedTextMissing(String),
    #[error("serial output failed: {0}")]
    Serial(#[from] std::io::Error),
    #[error("serial task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Parser, Debug)]
#[command(name = "wokwi-cli", version, about = "Run firmware on the Wokwi simulator")]
struct Cli {
    #[arg(long, env = "WOKWI_CLI_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    #[arg(long, env = "WOKWI_CLI_SERVER", default_value = DEFAULT_WS_URL, global = true)]
    server: String,

    /// Log verbosity on stderr: -v info, -vv debug, -vvv trace.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a project, run it for a simulated duration and stream serial output.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long, default_value = "diagram.json")]
    diagram: PathBuf,

    /// Firmware image (.bin, .hex, .uf2) or an ESP-IDF flasher_args.json.
    #[arg(long)]
    firmware: PathBuf,

    #[arg(long)]
    elf: Option<PathBuf>,

    /// Custom chip base path; `chips/inverter` uploads `chips/inverter.chip.json` and `.chip.bin`.
    #[arg(long = "chip")]
    chips: Vec<PathBuf>,

    /// Simulated seconds to run before stopping.
    #[arg(long, default_value_t = 10.0)]
    timeout: f64,

    /// Fail unless the serial output contains this text.
    #[arg(long)]
    expect_text: Option<String>,

    /// Save the logic analyzer capture here after the run.
    #[arg(long)]
    vcd: Option<PathBuf>,

    /// Display part to screenshot after the run (e.g. lcd1).
    #[arg(long, requires = "screenshot_file")]
    screenshot_part: Option<String>,

    #[arg(long, requires = "screenshot_part")]
    screenshot_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Some(command) = cli.command else {
        println!("{GREETING}");
        return Ok(());
    };

    let token = cli.token.filter(|t| !t.trim().is_empty()).ok_or(CliError::MissingToken)?;
    let config = ClientConfig::new(token).with_server_url(cli.server);

    match command {
        Command::Run(args) => run(config, args).await,
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_max_level(level).init();
}

// =============================================================================
// RUN
// =============================================================================

async fn run(config: ClientConfig, args: RunArgs) -> Result<(), CliError> {
    if !args.timeout.is_finite() || args.timeout < 0.0 {
        return Err(CliError::InvalidTimeout(args.timeout));
    }

    let client = WokwiClient::new(config);
    let hello = client.connect().await?;
    info!(server_version = %hello.app_version, "cli: connected");

    let options = upload_project(&client, &args).await?;
    // Listen first so boot output printed right after start is captured.
    let monitor = client.serial_monitor().await?;
    let printer = tokio::spawn(print_serial(monitor));
    client.start_simulation(&options).await?;

    client.wait_until_simulation_time(args.timeout).await?;
    info!(seconds = args.timeout, "cli: simulation time reached");

    if let Some(path) = &args.vcd {
        let data = client.save_vcd(path, true).await?;
        info!(path = %path.display(), samples = data.sample_count, "cli: vcd exported");
    }
    if let (Some(part), Some(path)) = (&args.screenshot_part, &args.screenshot_file) {
        client.save_framebuffer_png(part, path, true).await?;
    }

    client.disconnect().await?;
    let transcript = printer.await??;

    match args.expect_text {
        Some(expected) if !transcript.contains(&expected) => Err(CliError::ExpectedTextMissing(expected)),
        _ => Ok(()),
    }
}

async fn upload_project(client: &WokwiClient, args: &RunArgs) -> Result<StartOptions, CliError> {
    client.upload_file("diagram.json", Some(&args.diagram)).await?;

    let firmware = client.upload_file(&upload_name(&args.firmware)?, Some(&args.firmware)).await?;
    let mut options = StartOptions::new(firmware);

    if let Some(elf) = &args.elf {
        options.elf = Some(client.upload_file(&upload_name(elf)?, Some(elf)).await?);
    }

    for chip in &args.chips {
        let name = upload_name(chip)?;
        for suffix in ["chip.json", "chip.bin"] {
            let file = format!("{name}.{suffix}");
            client.upload_file(&file, Some(&chip.with_file_name(&file))).await?;
        }
        options.chips.push(name);
    }
    Ok(options)
}

/// Copy serial output to stdout and return everything that was printed.
async fn print_serial(mut monitor: SerialMonitor) -> Result<String, std::io::Error> {
    let mut stdout = tokio::io::stdout();
    let mut transcript = String::new();
    while let Some(chunk) = monitor.next_chunk().await {
        let text = String::from_utf8_lossy(&chunk);
        stdout.write_all(text.as_bytes()).await?;
        stdout.flush().await?;
        transcript.push_str(&text);
    }
    Ok(transcript)
}

fn upload_name(path: &Path) -> Result<String, CliError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
        .ok_or_else(|| CliError::InvalidPath(path.to_path_buf()))
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
