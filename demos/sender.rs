use clap::Parser;
use clap_derive::Parser;
use lossylink::console::run_sender_console;
use lossylink::messaging::transport::DatagramSocket;
use lossylink::metrics::{MetricsSink, StatsCollector};
use lossylink::sender::reliability_engine::ReliabilityEngine;
use lossylink::sender::sender_config::SenderConfig;
use lossylink::util::random::RngRandom;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::UdpSocket;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[derive(Parser)]
struct Args {
    #[clap(long, default_value = "127.0.0.1")]
    target_ip: IpAddr,

    #[clap(long, default_value_t = 8888)]
    target_port: u16,

    /// seconds to wait for an acknowledgment before re-sending a message
    #[clap(long, default_value_t = 2.0)]
    timeout: f64,

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

    let mut config = SenderConfig::new(SocketAddr::new(args.target_ip, args.target_port));
    config.ack_timeout = Duration::try_from_secs_f64(args.timeout)?;
    let config = Arc::new(config);

    let bind_addr: SocketAddr = if args.target_ip.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }.parse()?;
    let socket: Arc<dyn DatagramSocket> = Arc::new(UdpSocket::bind(bind_addr).await?);
    info!("sending from {:?}", socket.local_addr()?);

    let metrics = Arc::new(StatsCollector::new());
    let engine = Arc::new(ReliabilityEngine::<RngRandom>::new(config, socket, metrics.clone())?);

    let cancel = CancellationToken::new();
    let engine_handle = tokio::spawn(engine.clone().run(cancel.clone()));

    let stdin = BufReader::new(tokio::io::stdin());
    let console_result = select! {
        result = run_sender_console(engine.as_ref(), stdin, &cancel) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        }
    };

    cancel.cancel();
    engine_handle.await?;
    metrics.report();
    console_result
}
