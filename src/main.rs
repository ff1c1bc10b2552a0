//! statsd-amqp - relay metrics snapshots to an AMQP broker
//!
//! A minimal host for the AMQP backend: reads one JSON metrics snapshot per
//! line from stdin and flushes it to the broker, logging backend status on
//! every flush interval.
//!
//! # Usage
//! ```sh
//! AMQP_HOST=rabbit AMQP_MESSAGE_FORMAT=graphite my-aggregator | statsd-amqp
//! statsd-amqp --config statsd-amqp.toml --once < snapshot.json
//! ```
//!
//! # Environment Variables
//! - `AMQP_HOST`, `AMQP_PORT`, `AMQP_LOGIN`, `AMQP_PASSWORD`, `AMQP_VHOST`
//! - `AMQP_EXCHANGE` - Target topic exchange (default: broker default exchange)
//! - `AMQP_MESSAGE_FORMAT` - `graphite` or `json` (default: json)
//! - `STATSD_DEBUG` - Log every publish and connection transition

use anyhow::Result;
use clap::Parser;
use statsd_amqp::application::connection_manager::ConnectionPhase;
use statsd_amqp::domain::telemetry::unix_now;
use statsd_amqp::infrastructure::EventHub;
use statsd_amqp::{AmqpBackend, BackendConfig, MetricsSnapshot};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "statsd-amqp", version, about = "Publish metrics snapshots to an AMQP broker")]
struct Args {
    /// TOML configuration file; environment variables are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Flush the first snapshot read from stdin, then exit
    #[arg(long)]
    once: bool,
}

fn init_tracing(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with(stderr_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => BackendConfig::from_file(path)?,
        None => BackendConfig::from_env()?,
    };
    init_tracing(config.debug);
    info!("statsd-amqp {} starting...", env!("CARGO_PKG_VERSION"));

    let mut hub = EventHub::new();
    let backend = AmqpBackend::init(unix_now(), &config, &mut hub)?;
    info!("Registered backends: {:?}", hub.backend_names());

    if args.once {
        // A single flush is pointless before the first connection is up
        let mut state = backend.connections().subscribe();
        let connected = tokio::time::timeout(
            config.operation_timeout,
            state.wait_for(|s| s.phase() == ConnectionPhase::Connected),
        )
        .await;
        if !matches!(connected, Ok(Ok(_))) {
            warn!(
                "Broker not reachable within {:?}; flushing anyway",
                config.operation_timeout
            );
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut status_interval = tokio::time::interval(config.flush_interval);
    status_interval.tick().await;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match MetricsSnapshot::from_json(&line) {
                    Ok(snapshot) => {
                        hub.flush_all(unix_now(), &snapshot).await;
                        if args.once {
                            break;
                        }
                    }
                    Err(e) => warn!("Skipping malformed snapshot: {}", e),
                }
            }
            _ = status_interval.tick() => {
                hub.status_all(&mut |category, name, value| {
                    info!("status {}.{}: {}", category, name, value);
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received. Exiting...");
                break;
            }
        }
    }

    hub.status_all(&mut |category, name, value| {
        info!("status {}.{}: {}", category, name, value);
    });
    debug!("Backend metrics:\n{}", backend.metrics().render());
    backend.shutdown();

    Ok(())
}
