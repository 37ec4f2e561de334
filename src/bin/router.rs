use std::net::SocketAddr;
use std::time::Duration;
use clap::Parser;
use clap_derive::Parser;
use tracing::{info, Level};
use udp_httpfs::test_util::relay::{FaultPolicy, NoFaults, RandomFaults, Relay};

/// Relay between clients and servers, simulating an unreliable network
#[derive(Parser)]
struct Args {
    #[clap(long, default_value_t = 3000)]
    port: u16,

    /// probability for each frame to be dropped
    #[clap(long, default_value_t = 0.0)]
    drop_rate: f64,

    /// probability for each frame to be delivered twice
    #[clap(long, default_value_t = 0.0)]
    duplicate_rate: f64,

    /// frames are delayed by a random time up to this, which reorders them
    #[clap(long, default_value_t = 0)]
    max_delay_ms: u64,

    /// seed for reproducible faults
    #[clap(long)]
    seed: Option<u64>,

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

    let policy: Box<dyn FaultPolicy> = if args.drop_rate == 0.0 && args.duplicate_rate == 0.0 && args.max_delay_ms == 0 {
        Box::new(NoFaults)
    }
    else {
        info!("drop rate {}, duplicate rate {}, max delay {} ms", args.drop_rate, args.duplicate_rate, args.max_delay_ms);
        Box::new(RandomFaults::new(args.drop_rate, args.duplicate_rate, Duration::from_millis(args.max_delay_ms), args.seed)?)
    };

    let relay = Relay::bind(SocketAddr::from(([0, 0, 0, 0], args.port))).await?;
    relay.run(policy).await
}
