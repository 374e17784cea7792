//! Receiver-side bootstrap: connect, measure for a fixed duration, print
//! the result line.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use sendpath::tcp::TcpStream;
use sendpath::{measure, NetConfig, FIELD_COUNT};

/// Connects to a sendpath server and measures receive throughput and
/// per-message latency.
#[derive(Debug, Parser)]
#[command(name = "sendpath-client", version, about)]
struct Args {
    /// Server address
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Server port
    #[arg(long, default_value_t = 9090)]
    port: u16,

    /// Bytes per message field (must match the server)
    #[arg(long, default_value_t = 4096)]
    field_size: usize,

    /// Measurement duration in seconds
    #[arg(long, default_value_t = 10)]
    duration: u64,
}

fn main() -> sendpath::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let addr = SocketAddr::new(args.host, args.port);
    let stream = TcpStream::connect(addr, &NetConfig::default())?;
    log::info!("connected to {addr}, measuring for {}s", args.duration);

    let mut reader = stream.as_std();
    let report = measure::run(
        &mut reader,
        FIELD_COUNT * args.field_size,
        Duration::from_secs(args.duration),
    )?;
    println!("{report}");
    Ok(())
}
