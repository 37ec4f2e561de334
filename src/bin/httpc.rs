use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use anyhow::anyhow;
use bytes::Bytes;
use clap::Parser;
use clap_derive::{Args, Parser, Subcommand};
use hyper::header::{HeaderName, HeaderValue, HOST};
use hyper::{Method, Request, Response, Uri};
use tokio::net::lookup_host;
use tracing::{debug, Level};
use udp_httpfs::config::{ClientConfig, DEFAULT_RELAY_ADDR};
use udp_httpfs::http::client::HttpClient;
use udp_httpfs::http::message::request;
use udp_httpfs::http::url::{authority, host_port, parse_url, request_target};
use udp_httpfs::tcp::send_over_tcp;

/// Simple HTTP client
#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// GET the resource at URL
    Get(CommonArgs),
    /// POST data to the resource at URL
    Post {
        #[command(flatten)]
        common: CommonArgs,

        /// inline request body
        #[arg(short, long, conflicts_with = "file")]
        data: Option<String>,

        /// read the request body from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[derive(Args)]
struct CommonArgs {
    url: String,

    /// extra header as 'key:value'
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// write the response body to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// relay that all datagrams are sent through
    #[arg(long, default_value_t = DEFAULT_RELAY_ADDR)]
    router: SocketAddr,

    /// talk TCP to the server directly, bypassing the relay
    #[arg(long, default_value_t = false)]
    tcp: bool,

    /// print the status line and headers
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[arg(long, default_value_t = false)]
    very_verbose: bool,
}

impl CommonArgs {
    fn build_request(&self, method: Method, body: Bytes) -> anyhow::Result<Request<Bytes>> {
        let mut request = request(method, body);
        for header in &self.headers {
            let (name, value) = header.split_once(':')
                .ok_or_else(|| anyhow!("header {:?} is not of the form key:value", header))?;
            request.headers_mut().append(HeaderName::from_bytes(name.trim().as_bytes())?, HeaderValue::from_str(value.trim())?);
        }
        Ok(request)
    }
}

async fn send_tcp(uri: &Uri, mut request: Request<Bytes>) -> anyhow::Result<Response<Bytes>> {
    *request.uri_mut() = request_target(uri).parse()?;
    request.headers_mut().insert(HOST, HeaderValue::from_str(&authority(uri)?)?);

    let (host, port) = host_port(uri)?;
    let server = lookup_host((host, port)).await?
        .next()
        .ok_or_else(|| anyhow!("{} does not resolve", host))?;
    send_over_tcp(server, request).await
}

fn print_response(response: &Response<Bytes>, args: &CommonArgs) -> anyhow::Result<()> {
    if args.verbose || args.very_verbose {
        println!("{:?} {}", response.version(), response.status());
        for (name, value) in response.headers() {
            println!("{}: {}", name, String::from_utf8_lossy(value.as_bytes()));
        }
        println!();
    }

    let body = response.body();
    match &args.output {
        Some(path) => {
            std::fs::write(path, body)?;
            debug!("wrote {} bytes to {:?}", body.len(), path);
        }
        None => {
            let mut stdout = std::io::stdout();
            stdout.write_all(body)?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (args, method, body) = match cli.command {
        Command::Get(common) => (common, Method::GET, Bytes::new()),
        Command::Post { common, data, file } => {
            let body = match (data, file) {
                (Some(data), _) => Bytes::from(data),
                (None, Some(file)) => Bytes::from(std::fs::read(file)?),
                (None, None) => Bytes::new(),
            };
            (common, Method::POST, body)
        }
    };

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let uri = parse_url(&args.url)?;
    let request = args.build_request(method, body)?;

    let response = if args.tcp {
        send_tcp(&uri, request).await?
    }
    else {
        let mut client = HttpClient::new(ClientConfig::new(args.router))?;
        let response = client.send(&uri, request).await;
        client.finish().await;
        response?
    };

    print_response(&response, &args)
}
