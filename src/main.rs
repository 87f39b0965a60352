use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use clap::{ArgAction, Parser};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use synprobe::{
    Capture, PacketCapture, PortState, ProbeConfig, ProbeCoordinator, RawTransport, Transport,
};

const DEFAULT_PORT: u16 = 80;

#[derive(Parser)]
#[command(name = "synprobe")]
#[command(about = "Half-open TCP SYN prober. Needs CAP_NET_RAW.")]
struct CommandLine {
    /// IPv4 address to probe
    target: Ipv4Addr,

    /// Comma separated destination ports
    #[arg(short, long, value_delimiter = ',', default_values_t = [DEFAULT_PORT])]
    ports: Vec<u16>,

    /// Milliseconds to wait for a reply before reporting a port as filtered
    #[arg(short, long = "timeout-ms", default_value_t = 1500)]
    timeout: u64,

    /// Source address for outgoing SYNs (default: picked from the routing table)
    #[arg(short, long)]
    source: Option<Ipv4Addr>,

    /// Extra attempts for ports that come back filtered
    #[arg(short, long, default_value_t = 0)]
    retries: u32,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Filtered is the only verdict worth another attempt.
fn probe_with_retries<T: Transport>(
    coordinator: &mut ProbeCoordinator<'_, T>,
    target: SocketAddrV4,
    retries: u32,
) -> anyhow::Result<PortState> {
    let mut state = coordinator.probe(target)?;
    for attempt in 1..=retries {
        if state != PortState::Filtered {
            break;
        }
        warn!(peer = %target, attempt, "no reply, retrying");
        state = coordinator.probe(target)?;
    }
    Ok(state)
}

fn main() -> anyhow::Result<()> {
    let commands = CommandLine::parse();
    init_logging(commands.verbose);

    let config = ProbeConfig {
        timeout: Duration::from_millis(commands.timeout),
        source_ip: commands.source,
        ..ProbeConfig::default()
    };

    // Capture first so no reply can slip past before we listen.
    let capture = Capture::start(PacketCapture::open(config.poll_interval)?)?;
    let transport = RawTransport::open()?;
    let mut coordinator = ProbeCoordinator::new(transport, &capture, config);

    for port in commands.ports {
        let target = SocketAddrV4::new(commands.target, port);
        let state = probe_with_retries(&mut coordinator, target, commands.retries)?;
        println!("{target} {state}");
    }

    drop(coordinator);
    capture.stop();
    Ok(())
}
