use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::registry::{PluginInfo, PluginSet};

/// Stats worker for a plugin-based log forwarder
///
/// Runs the aggregation worker with a set of synthetic plugins reporting
/// throughput, and serves the control socket for inspection clients.
#[derive(Parser, Debug, Clone, Default)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// JSON configuration file (fields not set fall back to defaults)
    #[clap(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Path of the control socket
    #[clap(long)]
    pub socket_path: Option<PathBuf>,

    /// Datapoint slots kept per plugin
    #[clap(long)]
    pub buffer_capacity: Option<usize>,

    /// Listen backlog of the control socket
    #[clap(long)]
    pub backlog: Option<i32>,

    /// Active input plugin to simulate (repeatable)
    #[clap(short = 'i', long = "input", value_name = "NAME")]
    pub inputs: Vec<String>,

    /// Active output plugin to simulate (repeatable)
    #[clap(short = 'o', long = "output", value_name = "NAME")]
    pub outputs: Vec<String>,

    /// Input plugin that is configured but inactive (repeatable)
    #[clap(long = "inactive", value_name = "NAME")]
    pub inactive: Vec<String>,

    /// How often each simulated plugin reports (e.g. "250ms", "1s")
    #[clap(short = 'e', long, value_parser = parse_duration, default_value = "250ms")]
    pub emit_interval: Duration,

    /// Stop after this long instead of running forever (e.g. "10s", "5m")
    #[clap(short = 'd', long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Verbose output
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,
}

impl Args {
    /// The plugin set described by the command line.
    ///
    /// With no plugins named, a small default pipeline is simulated.
    pub fn plugin_set(&self) -> PluginSet {
        let (inputs, outputs) = if self.inputs.is_empty() && self.outputs.is_empty() {
            (vec!["cpu".to_string(), "mem".to_string()], vec!["stdout".to_string()])
        } else {
            (self.inputs.clone(), self.outputs.clone())
        };

        let mut set = PluginSet {
            inputs: inputs.into_iter().map(PluginInfo::active).collect(),
            outputs: outputs.into_iter().map(PluginInfo::active).collect(),
        };
        set.inputs
            .extend(self.inactive.iter().cloned().map(PluginInfo::inactive));
        set
    }
}

/// Parse duration from string (e.g., "10s", "5m", "1h", "250ms")
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if num < 0.0 {
        return Err(format!("Duration cannot be negative: {}", s));
    }

    let duration = match unit {
        "ms" => Duration::from_millis(num as u64),
        "s" => Duration::from_secs_f64(num),
        "m" => Duration::from_secs_f64(num * 60.0),
        "h" => Duration::from_secs_f64(num * 3600.0),
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Ok(duration)
}
