use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use anyhow::Result;
use forwarder_stats::{PluginSet, StatsConfig, StatsEngine};

fn engine(dir: &tempfile::TempDir) -> Result<StatsEngine> {
    let config = StatsConfig {
        socket_path: dir.path().join("control.sock"),
        ..Default::default()
    };
    let (mut engine, _) = StatsEngine::init(config, &PluginSet::default())?;
    engine.start_control_server()?;
    Ok(engine)
}

fn client_count(engine: &StatsEngine) -> usize {
    engine.control_server().map_or(0, |s| s.client_count())
}

fn pump_until(engine: &mut StatsEngine, done: impl Fn(&StatsEngine) -> bool) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !done(engine) && Instant::now() < deadline {
        engine.run_once(Some(Duration::from_millis(50)))?;
    }
    Ok(())
}

/// Connect, disconnect, then connect again: the count follows the peer and
/// the released socket does not block a new connection.
#[test]
fn client_lifecycle_is_tracked() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut engine = engine(&dir)?;
    let path = engine.config().socket_path.clone();

    let first = UnixStream::connect(&path)?;
    pump_until(&mut engine, |e| client_count(e) == 1)?;
    assert_eq!(client_count(&engine), 1);

    drop(first);
    pump_until(&mut engine, |e| client_count(e) == 0)?;
    assert_eq!(client_count(&engine), 0);

    let _second = UnixStream::connect(&path)?;
    pump_until(&mut engine, |e| client_count(e) == 1)?;
    assert_eq!(client_count(&engine), 1);

    let counters = engine.counters();
    assert_eq!(counters.accepted, 2);
    assert_eq!(counters.disconnected, 1);
    Ok(())
}

/// Several clients are tracked independently.
#[test]
fn many_clients_tracked_independently() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut engine = engine(&dir)?;
    let path = engine.config().socket_path.clone();

    let mut clients = (0..4)
        .map(|_| UnixStream::connect(&path))
        .collect::<std::io::Result<Vec<_>>>()?;
    pump_until(&mut engine, |e| client_count(e) == 4)?;
    assert_eq!(client_count(&engine), 4);

    clients.truncate(1);
    pump_until(&mut engine, |e| client_count(e) == 1)?;
    assert_eq!(client_count(&engine), 1);
    Ok(())
}

/// A stale socket file from an earlier run does not prevent startup.
#[test]
fn stale_socket_file_is_replaced() -> Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("control.sock"), b"left over")?;

    let mut engine = engine(&dir)?;
    let _client = UnixStream::connect(&engine.config().socket_path)?;
    pump_until(&mut engine, |e| client_count(e) == 1)?;
    assert_eq!(client_count(&engine), 1);
    Ok(())
}

/// The worker thread binds the socket itself.
#[test]
fn spawned_worker_serves_control_socket() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("control.sock");
    let config = StatsConfig {
        socket_path: path.clone(),
        ..Default::default()
    };
    let (engine, _) = StatsEngine::init(config, &PluginSet::default())?;
    let worker = engine.spawn()?;

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut connected = UnixStream::connect(&path);
    while connected.is_err() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
        connected = UnixStream::connect(&path);
    }
    assert!(connected.is_ok());
    assert!(!worker.is_finished());
    Ok(())
}
