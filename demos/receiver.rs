use clap::Parser;
use clap_derive::Parser;
use lossylink::receiver::reassembly_engine::ReassemblyEngine;
use lossylink::receiver::receiver_config::ReceiverConfig;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[derive(Parser)]
struct Args {
    #[clap(long, default_value = "127.0.0.1")]
    listen_ip: IpAddr,

    #[clap(long, default_value_t = 8888)]
    listen_port: u16,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let config = ReceiverConfig::new(SocketAddr::new(args.listen_ip, args.listen_port));
    let socket = Arc::new(UdpSocket::bind(config.listen_addr).await?);
    let engine = ReassemblyEngine::new(socket);

    let cancel = CancellationToken::new();
    let engine_handle = tokio::spawn(engine.run(cancel.clone()));

    select! {
        _ = cancel.cancelled() => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    cancel.cancel();
    engine_handle.await?
}
