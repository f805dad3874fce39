//! # Weave Client
//!
//! Headless client: handshakes with a server, drives its tank in a slow
//! circle and logs what it sees.
//!
//! ## Usage
//!
//! ```bash
//! weave_client --server 127.0.0.1:50001 --name Alice --duration 30
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use weave_core::SystemClock;
use weave_networking::{ConnectionState, GameClient, InputState, NetConfig};

const FRAME: Duration = Duration::from_millis(16);
const REPORT_INTERVAL: Duration = Duration::from_secs(2);

struct Args {
    config: Option<PathBuf>,
    server: Option<SocketAddr>,
    name: Option<String>,
    duration: Option<u64>,
}

fn print_help() {
    println!("Usage: weave_client [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config <FILE>     TOML configuration file");
    println!("  -s, --server <ADDR>     Server address (overrides config)");
    println!("  -n, --name <NAME>       Player name (overrides config)");
    println!("  -d, --duration <SECS>   Run for N seconds then exit");
    println!("  -h, --help              Show this help");
}

fn parse_args() -> Result<Option<Args>, String> {
    let mut args = Args {
        config: None,
        server: None,
        name: None,
        duration: None,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(flag) = iter.next() {
        let mut value = |name: &str| iter.next().ok_or_else(|| format!("{name} needs a value"));
        match flag.as_str() {
            "--config" | "-c" => args.config = Some(PathBuf::from(value("--config")?)),
            "--server" | "-s" => {
                let raw = value("--server")?;
                args.server = Some(raw.parse().map_err(|_| format!("bad address: {raw}"))?);
            }
            "--name" | "-n" => args.name = Some(value("--name")?),
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
    if let Some(server) = args.server {
        config.client.server_addr = server;
    }
    if let Some(name) = args.name {
        config.client.name = name;
    }

    let mut client = match GameClient::new(config.client, config.transport, SystemClock::shared()) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "cannot open socket");
            return ExitCode::FAILURE;
        }
    };
    client.connect_default();

    let start = Instant::now();
    let deadline = args.duration.map(Duration::from_secs);
    let mut last_report = Instant::now();
    let mut last_state = ConnectionState::Uninitialized;

    loop {
        if deadline.is_some_and(|d| start.elapsed() >= d) {
            break;
        }

        if client.state() == ConnectionState::Welcomed {
            let input = client.input_mut();
            input.forward = 1.0;
            input.turn = 0.25;
            input.turret_yaw = (start.elapsed().as_secs_f32() * 0.5).sin();
            input.set_button(InputState::FIRE, start.elapsed().as_secs() % 3 == 0);
        }

        client.tick();

        if client.state() != last_state {
            last_state = client.state();
            info!(state = ?last_state, player_id = ?client.player_id(), "connection state changed");
        }

        if last_report.elapsed() >= REPORT_INTERVAL {
            last_report = Instant::now();
            let stats = client.stats();
            info!(
                entities = client.mirror().len(),
                packets_in = stats.packets_received,
                packets_out = stats.packets_sent,
                dropped = client.decode_errors(),
                "client stats"
            );
            for entity in client.mirror().iter() {
                info!(
                    id = %entity.network_id,
                    name = %entity.name,
                    class = ?entity.class_type,
                    x = entity.position.x,
                    z = entity.position.z,
                    "entity"
                );
            }
        }

        std::thread::sleep(FRAME);
    }

    client.disconnect();
    client.shutdown();
    ExitCode::SUCCESS
}
