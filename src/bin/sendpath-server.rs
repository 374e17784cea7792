//! Sender-side bootstrap: bind, accept, hand connections to workers.

use std::net::{IpAddr, SocketAddr};

use clap::Parser;
use sendpath::tcp::TcpListener;
use sendpath::{BenchConfig, NetConfig, Strategy};

/// Streams benchmark messages to every connecting receiver using the
/// selected copy strategy.
#[derive(Debug, Parser)]
#[command(name = "sendpath-server", version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Port to listen on
    #[arg(long, default_value_t = 9090)]
    port: u16,

    /// Bytes per message field (8 fields per message)
    #[arg(long, default_value_t = 4096)]
    field_size: usize,

    /// Maximum concurrently served connections
    #[arg(long, default_value_t = 64)]
    max_connections: usize,

    /// Send pipeline: full-copy, single-buffer or zero-copy
    #[arg(long, default_value = "full-copy")]
    strategy: Strategy,

    /// Pin each worker thread to a CPU core
    #[arg(long)]
    pin_workers: bool,
}

fn main() -> sendpath::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut cfg = BenchConfig::new(args.field_size, args.max_connections);
    cfg.pin_workers = args.pin_workers;
    cfg.validate()?;

    let addr = SocketAddr::new(args.bind, args.port);
    let listener = TcpListener::bind(addr, &NetConfig::default())?;
    log::info!(
        "listening on {addr} (strategy={}, field_size={}, max_connections={})",
        args.strategy,
        args.field_size,
        args.max_connections
    );
    sendpath::serve(listener, args.strategy, &cfg)
}
