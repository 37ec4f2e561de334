use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use anyhow::anyhow;
use clap::Parser;
use clap_derive::Parser;
use tracing::{info, Level};
use udp_httpfs::config::{ServerConfig, DEFAULT_RELAY_ADDR};
use udp_httpfs::http::handler::FileRequestHandler;
use udp_httpfs::tcp::TcpFileServer;
use udp_httpfs::transport::dispatcher::Dispatcher;

/// Simple file server
#[derive(Parser)]
struct Args {
    #[clap(short, long, default_value_t = 8080)]
    port: u16,

    /// directory to serve, created if missing
    #[clap(short = 'd', long, default_value = "Data")]
    directory: PathBuf,

    /// relay that all datagrams are sent through
    #[clap(long, default_value_t = DEFAULT_RELAY_ADDR)]
    router: SocketAddr,

    /// serve over TCP instead of the datagram transport
    #[clap(long, default_value_t = false)]
    tcp: bool,

    /// PATH=URL, answer requests for PATH with a redirect to URL
    #[clap(long)]
    redirect: Vec<String>,

    #[clap(long)]
    retransmit_timeout_ms: Option<u64>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

impl Args {
    fn config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = ServerConfig::new(self.router);
        config.port = self.port;
        config.root_dir = self.directory.clone();

        for r in &self.redirect {
            let (path, target) = r.split_once('=')
                .ok_or_else(|| anyhow!("redirect {:?} is not of the form PATH=URL", r))?;
            config.redirects.insert(path.to_string(), target.to_string());
        }
        if let Some(millis) = self.retransmit_timeout_ms {
            config.transport.retransmit_timeout = std::time::Duration::from_millis(millis);
            config.transport.grace_period = config.transport.grace_period.max(config.transport.retransmit_timeout * 2);
        }

        config.validate()?;
        Ok(config)
    }
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

    let config = args.config()?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    if args.tcp {
        let handler = FileRequestHandler::from_config(&config, usize::MAX).await?;
        let server = TcpFileServer::bind(addr, Arc::new(handler)).await?;
        info!("serving {:?} over TCP", config.root_dir);
        server.run().await
    }
    else {
        let handler = FileRequestHandler::from_config(&config, config.transport.max_payload_len()).await?;
        let dispatcher = Dispatcher::bind(addr, Arc::new(handler), Arc::new(config.transport.clone())).await?;
        info!("serving {:?} via relay {:?}", config.root_dir, config.transport.relay_addr);
        dispatcher.recv_loop().await
    }
}
