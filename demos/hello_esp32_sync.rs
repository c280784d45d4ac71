//! Blocking variant of the hello world demo.
//!
//! Expects `hello_world.bin` and `hello_world.elf` next to the diagram in
//! `demos/hello_esp32/`.

use std::path::Path;

use wokwi_client::{GET_TOKEN_URL, StartOptions, TOKEN_ENV, WokwiClientSync};

const PROJECT_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/hello_esp32");

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    if std::env::var(TOKEN_ENV).map_or(true, |t| t.is_empty()) {
        eprintln!("Set {TOKEN_ENV} in your environment. You can get it from {GET_TOKEN_URL}.");
        std::process::exit(1);
    }
    let seconds = std::env::var("WOKWI_SLEEP_TIME").ok().and_then(|v| v.parse().ok()).unwrap_or(10.0);

    let project = Path::new(PROJECT_DIR);
    let client = WokwiClientSync::from_env()?;
    println!("Wokwi client library version: {}", client.version());

    let hello = client.connect()?;
    println!("Connected to Wokwi Simulator, server version: {}", hello.app_version);

    client.upload_file("diagram.json", Some(&project.join("diagram.json")))?;
    client.upload_file("hello_world.bin", Some(&project.join("hello_world.bin")))?;
    client.upload_file("hello_world.elf", Some(&project.join("hello_world.elf")))?;
    client.start_simulation(&StartOptions::new("hello_world.bin").with_elf("hello_world.elf"))?;

    // Runs on the client's loop thread; this thread stays free.
    client.serial_monitor_cat()?;

    println!("Simulation started, waiting for {seconds} seconds...");
    client.wait_until_simulation_time(seconds)?;

    client.disconnect()?;
    Ok(())
}
