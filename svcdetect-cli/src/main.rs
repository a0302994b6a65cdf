#![forbid(unsafe_code)]

//! Diagnostic driver: replays length-prefixed UDP payloads captured to a
//! file through the dispatch engine and prints the per-packet verdict.
//!
//! Record format: a 4-byte big-endian length, a 1-byte direction (`0` =
//! from the initiator, anything else = from the responder), then that many
//! payload bytes. Packet capture itself is out of scope; this only replays
//! pre-captured bytes against the public API.

use std::fs;
use std::io::Read;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use svcdetect_core::detectors::RtpDetector;
use svcdetect_core::{Direction, Dispatcher, Endpoint, FlowSession, Limits, Registry, Transport};

#[derive(Parser, Debug)]
#[command(author, version, about = "svcdetect diagnostic replay driver")]
struct Cli {
    /// Path to a captured-flow file (length-prefixed UDP payload records).
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Client (initiator) IP address.
    #[arg(long, default_value = "10.0.0.1")]
    client_ip: IpAddr,

    /// Server (responder) IP address.
    #[arg(long, default_value = "10.0.0.2")]
    server_ip: IpAddr,

    /// Server (responder) UDP port.
    #[arg(long, default_value_t = 5004)]
    server_port: u16,

    /// SSL/TLS port-remap detection level (0 disables the remap table).
    #[arg(long, default_value_t = 0)]
    detection_level: u8,

    /// Print the registry's port-binding table and exit.
    #[arg(long)]
    dump_ports: bool,
}

fn main() {
    init_tracing();

    let cli = Cli::parse();

    let mut registry = Registry::new(Limits::default());
    if let Err(err) = registry.register(Arc::new(RtpDetector::new())) {
        error!(%err, "failed to register detector");
        std::process::exit(1);
    }
    registry.finalize();

    if cli.dump_ports {
        let (tcp, udp) = registry.dump_ports();
        println!("tcp {tcp}\nudp {udp}");
        return;
    }

    let records = match load_records(&cli.input) {
        Ok(records) => records,
        Err(err) => {
            error!(%err, path = %cli.input.display(), "failed to read capture file");
            std::process::exit(1);
        }
    };
    info!(records = records.len(), path = %cli.input.display(), "replaying flow");

    let dispatcher = Dispatcher::new(registry, Limits::default()).with_detection_level(cli.detection_level);
    let mut flow = FlowSession::new();
    let endpoint = Endpoint {
        client_ip: cli.client_ip,
        client_port: 0,
        server_ip: cli.server_ip,
        server_port: cli.server_port,
        transport: Transport::Udp,
    };

    for (index, record) in records.iter().enumerate() {
        let status = dispatcher.discover_service(&record.payload, record.dir, endpoint, &mut flow);
        info!(
            packet = index,
            dir = ?record.dir,
            bytes = record.payload.len(),
            ?status,
            service_app_id = flow.service_app_id.0,
            "dispatched"
        );
    }

    if flow.service_app_id == svcdetect_core::AppId::NONE {
        warn!("flow ended without a confirmed service");
    }
}

struct Record {
    dir: Direction,
    payload: Vec<u8>,
}

fn load_records(path: &PathBuf) -> std::io::Result<Vec<Record>> {
    let mut file = fs::File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    let mut records = Vec::new();
    let mut cursor = 0usize;
    while cursor + 5 <= bytes.len() {
        let len = u32::from_be_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
        let dir_byte = bytes[cursor + 4];
        cursor += 5;
        if cursor + len > bytes.len() {
            break;
        }
        let payload = bytes[cursor..cursor + len].to_vec();
        cursor += len;
        let dir = if dir_byte == 0 {
            Direction::FromInitiator
        } else {
            Direction::FromResponder
        };
        records.push(Record { dir, payload });
    }
    Ok(records)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
