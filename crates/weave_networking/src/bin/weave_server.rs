//! # Weave Server
//!
//! Runs the authoritative replication server.
//!
//! ## Usage
//!
//! ```bash
//! weave_server --config weave.toml --port 50001 --duration 60
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use weave_core::SystemClock;
use weave_networking::{GameServer, NetConfig, TickLoop};

/// Seconds between statistics lines.
const STATS_INTERVAL: Duration = Duration::from_secs(5);

struct Args {
    config: Option<PathBuf>,
    port: Option<u16>,
    duration: Option<u64>,
}

fn print_help() {
    println!("Usage: weave_server [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config <FILE>     TOML configuration file");
    println!("  -p, --port <PORT>       UDP port to bind (overrides config)");
    println!("  -d, --duration <SECS>   Run for N seconds then exit");
    println!("  -h, --help              Show this help");
}

/// Returns `None` when the process should exit after printing help.
fn parse_args() -> Result<Option<Args>, String> {
    let mut args = Args {
        config: None,
        port: None,
        duration: None,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(flag) = iter.next() {
        let mut value = |name: &str| iter.next().ok_or_else(|| format!("{name} needs a value"));
        match flag.as_str() {
            "--config" | "-c" => args.config = Some(PathBuf::from(value("--config")?)),
            "--port" | "-p" => {
                let raw = value("--port")?;
                args.port = Some(raw.parse().map_err(|_| format!("bad port: {raw}"))?);
            }
            "--duration" | "-d" => {
                let raw = value("--duration")?;
                args.duration = Some(raw.parse().map_err(|_| format!("bad duration: {raw}"))?);
            }
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(Some(args))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = match parse_args() {
        Ok(Some(args)) => args,
        Ok(None) => return ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            print_help();
            return ExitCode::FAILURE;
        }
    };

    let mut config = match args.config.as_deref().map(NetConfig::load).transpose() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            error!(error = %e, "cannot load configuration");
            return ExitCode::FAILURE;
        }
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let tick_rate = config.server.tick_rate;
    let mut server = match GameServer::new(config.server, config.transport, SystemClock::shared()) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "cannot start server");
            return ExitCode::FAILURE;
        }
    };

    let mut tick_loop = TickLoop::new(tick_rate);
    let start = Instant::now();
    let deadline = args.duration.map(Duration::from_secs);
    let mut last_stats = Instant::now();

    info!(tick_rate, "server running");

    loop {
        if deadline.is_some_and(|d| start.elapsed() >= d) {
            break;
        }

        tick_loop.wait_for_next_tick();
        while tick_loop.should_tick() {
            let tick_start = tick_loop.begin_tick();
            server.tick();
            tick_loop.end_tick(tick_start);
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            last_stats = Instant::now();
            let net = server.stats();
            let ticks = tick_loop.stats();
            info!(
                ticks = tick_loop.tick_count(),
                avg_tick_us = ticks.avg_tick_us,
                late_ticks = ticks.late_ticks,
                sessions = server.sessions().len(),
                entities = server.store().len(),
                snapshots = server.snapshots_sent(),
                packets_in = net.packets_received,
                packets_dropped = net.dropped,
                packets_out = net.packets_sent,
                decode_errors = server.decode_errors(),
                "server stats"
            );
        }
    }

    server.shutdown();
    info!(ticks = tick_loop.tick_count(), "server stopped");
    ExitCode::SUCCESS
}
