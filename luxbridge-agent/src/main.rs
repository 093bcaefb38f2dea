//! luxbridge agent binary
//!
//! # Usage
//!
//! ```bash
//! # Run with a configuration file
//! luxbridge -c /etc/luxbridge.ini
//!
//! # Debug logging, plus every message on the sensor topics
//! luxbridge -c luxbridge.toml --debug --trace-topic 'sensornetwork/#'
//!
//! # Override a key from the environment
//! LUXBRIDGE__MQTT__PASSWORD=secret luxbridge -c luxbridge.ini
//! ```
//!
//! Exits non-zero on invalid configuration or rejected broker credentials.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::{error, info};
use luxbridge_agent::{wait_for_signal, AgentConfig, Supervisor};
use luxbridge_connectors::Shutdown;

// =============================================================================
// CLI Argument Structure
// =============================================================================

/// LDR to MQTT bridge with rolling-average light control
#[derive(Parser, Debug)]
#[command(name = "luxbridge")]
#[command(version)]
#[command(about = "Bridge an LDR sensor, GPIO actuators and an MQTT broker", long_about = None)]
struct Args {
    /// Configuration file, INI or TOML
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short = 'v', long = "debug")]
    debug: bool,

    /// Log every message on this topic pattern (repeatable)
    #[arg(long = "trace-topic", value_name = "PATTERN")]
    trace_topics: Vec<String>,
}

// =============================================================================
// Logging Setup
// =============================================================================

/// `RUST_LOG` wins over `--debug`
fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

// =============================================================================
// Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let config = AgentConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let stop = Shutdown::new();
    let stop_signal = stop.signal();
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => info!("Received {name}"),
            Err(e) => error!("{e}, stopping"),
        }
        stop.trigger();
    });

    let summary = Supervisor::new(config)
        .trace_topics(args.trace_topics)
        .run(stop_signal)
        .await
        .context("luxbridge stopped")?;
    info!("Final counters: {summary:?}");
    Ok(())
}
