//! # Forwarder Stats - Main Entry Point
//!
//! Runs the stats worker against a set of simulated plugins:
//! 1. **Initialize logging**: colorized `tracing` output, `RUST_LOG` aware
//! 2. **Load configuration**: optional JSON file plus command-line overrides
//! 3. **Initialize the engine**: event loop, plugin channels, flush tick
//! 4. **Spawn the worker**: control socket + event loop on `stats-worker`
//! 5. **Drive plugins**: one thread per active plugin reporting random
//!    throughput through its channel
//!
//! Connect to the control socket (e.g. `socat - UNIX-CONNECT:<path>`) to see
//! client tracking in the logs.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use forwarder_stats::{cli::Args, logging, PluginStatsHandle, StatsConfig, StatsEngine};
use rand::Rng;
use tracing::{debug, error, info, warn};

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    info!("Starting forwarder stats {}", forwarder_stats::VERSION);
    debug!("Configuration: {:?}", args);

    let config = StatsConfig::from_args(&args).context("Invalid stats configuration")?;
    let plugins = args.plugin_set();

    let (engine, handles) =
        StatsEngine::init(config.clone(), &plugins).context("Failed to initialize stats")?;
    let worker = engine.spawn().context("Failed to spawn stats worker")?;
    info!("Control socket: {}", config.socket_path.display());

    let deadline = args.duration.map(|d| Instant::now() + d);
    let producers: Vec<_> = handles
        .into_iter()
        .map(|handle| spawn_producer(handle, args.emit_interval, deadline))
        .collect::<Result<_>>()?;

    match deadline {
        Some(deadline) => {
            while Instant::now() < deadline {
                if worker.is_finished() {
                    break;
                }
                thread::sleep(Duration::from_millis(100));
            }
            if worker.is_finished() {
                return match worker.join() {
                    Ok(result) => result.context("Stats worker failed"),
                    Err(_) => Err(anyhow::anyhow!("Stats worker panicked")),
                };
            }
            for producer in producers {
                if producer.join().is_err() {
                    warn!("A simulated plugin panicked");
                }
            }
            info!("Run duration elapsed, exiting");
            Ok(())
        }
        None => match worker.join() {
            Ok(result) => result.context("Stats worker failed"),
            Err(_) => Err(anyhow::anyhow!("Stats worker panicked")),
        },
    }
}

/// Report random throughput for one plugin until `deadline` (if any).
fn spawn_producer(
    handle: PluginStatsHandle,
    interval: Duration,
    deadline: Option<Instant>,
) -> Result<thread::JoinHandle<()>> {
    let name = format!("{}-{}", handle.kind, handle.name);
    thread::Builder::new()
        .name(name)
        .spawn(move || {
            let mut rng = rand::thread_rng();
            while deadline.map_or(true, |d| Instant::now() < d) {
                let records: u64 = rng.gen_range(1..=500);
                let bytes = records * rng.gen_range(64..=2048);
                if let Err(e) = handle.sender.record(records, bytes) {
                    error!("{} plugin {} could not report: {}", handle.kind, handle.name, e);
                    return;
                }
                thread::sleep(interval);
            }
        })
        .context("Failed to spawn simulated plugin")
}
