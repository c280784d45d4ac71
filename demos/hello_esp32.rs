//! Run an ESP-IDF hello world build for a few simulated seconds.
//!
//! Expects `demos/hello_esp32/build/flasher_args.json` (plus the binaries it
//! lists) from `idf.py build`, and a token in `WOKWI_CLI_TOKEN`.
//!
//! ```sh
//! WOKWI_CLI_TOKEN=... cargo run --example hello_esp32
//! ```

use std::path::Path;

use wokwi_client::{GET_TOKEN_URL, StartOptions, TOKEN_ENV, WokwiClient};

const PROJECT_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/hello_esp32");

fn sleep_time() -> f64 {
    std::env::var("WOKWI_SLEEP_TIME").ok().and_then(|v| v.parse().ok()).unwrap_or(10.0)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    if std::env::var(TOKEN_ENV).map_or(true, |t| t.is_empty()) {
        eprintln!("Set {TOKEN_ENV} in your environment. You can get it from {GET_TOKEN_URL}.");
        std::process::exit(1);
    }

    let project = Path::new(PROJECT_DIR);
    let client = WokwiClient::from_env()?;
    println!("Wokwi client library version: {}", client.version());

    let hello = client.connect().await?;
    println!("Connected to Wokwi Simulator, server version: {}", hello.app_version);

    client.upload_file("diagram.json", Some(&project.join("diagram.json"))).await?;
    let firmware = client
        .upload_file("flasher_args.json", Some(&project.join("build").join("flasher_args.json")))
        .await?;
    client.start_simulation(&StartOptions::new(firmware)).await?;

    let client = std::sync::Arc::new(client);
    let serial = tokio::spawn({
        let client = std::sync::Arc::clone(&client);
        async move { client.serial_monitor_cat().await }
    });

    let seconds = sleep_time();
    println!("Simulation started, waiting for {seconds} seconds...");
    client.wait_until_simulation_time(seconds).await?;

    client.disconnect().await?;
    serial.await??;
    Ok(())
}
