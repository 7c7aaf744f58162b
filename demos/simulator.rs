use clap::Parser;
use clap_derive::Parser;
use lossylink::console::run_simulator_console;
use lossylink::simulator::link_conditions::{DirectionConditions, LinkConditions};
use lossylink::simulator::network_simulator::NetworkSimulator;
use lossylink::simulator::simulator_config::SimulatorConfig;
use lossylink::util::random::RngRandom;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::UdpSocket;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[derive(Parser)]
struct Args {
    #[clap(long, default_value = "127.0.0.1")]
    listen_ip: IpAddr,

    #[clap(long, default_value_t = 8887)]
    listen_port: u16,

    #[clap(long, default_value = "127.0.0.1")]
    target_ip: IpAddr,

    #[clap(long, default_value_t = 8888)]
    target_port: u16,

    /// percentage of client -> server packets to drop
    #[clap(long, default_value_t = 0)]
    c_drop_chance: u32,

    /// percentage of client -> server packets to delay
    #[clap(long, default_value_t = 0)]
    c_delay_chance: u32,

    /// milliseconds by which client -> server packets are delayed
    #[clap(long, default_value_t = 0.0)]
    c_delay_time: f64,

    #[clap(long, default_value_t = 0)]
    s_drop_chance: u32,

    #[clap(long, default_value_t = 0)]
    s_delay_chance: u32,

    #[clap(long, default_value_t = 0.0)]
    s_delay_time: f64,

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

    let mut config = SimulatorConfig::new(
        SocketAddr::new(args.listen_ip, args.listen_port),
        SocketAddr::new(args.target_ip, args.target_port),
    );
    config.initial_conditions = LinkConditions {
        client: DirectionConditions::new(args.c_drop_chance, args.c_delay_chance, args.c_delay_time),
        server: DirectionConditions::new(args.s_drop_chance, args.s_delay_chance, args.s_delay_time),
    };
    let config = Arc::new(config);

    let socket = Arc::new(UdpSocket::bind(config.listen_addr).await?);
    let simulator = Arc::new(NetworkSimulator::<RngRandom>::new(config, socket)?);

    let cancel = CancellationToken::new();
    let simulator_handle = tokio::spawn(simulator.clone().run(cancel.clone()));

    let conditions = simulator.conditions();
    let stdin = BufReader::new(tokio::io::stdin());
    let console_result = select! {
        result = run_simulator_console(&conditions, stdin, &cancel) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        }
    };

    cancel.cancel();
    simulator_handle.await??;
    console_result
}
