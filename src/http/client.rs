use std::net::SocketAddrV4;
use std::sync::Arc;
use anyhow::{anyhow, bail};
use bytes::Bytes;
use hyper::header::{HeaderValue, HOST, LOCATION};
use hyper::{Request, Response, Uri};
use tokio::net::{lookup_host, UdpSocket};
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};
use crate::config::ClientConfig;
use crate::error::FrameError;
use crate::http::message::{parse_response, request_to_bytes};
use crate::http::url::{authority, host_port, join, request_target};
use crate::transport::client_session::{drain, exchange, ClientSession};
use crate::transport::config::TransportConfig;
use crate::transport::send_socket::{PeerFilteredSocket, RelaySocket};

/// Sends requests over the datagram transport, one session per request.
///
/// After a response arrived, its session keeps acknowledging duplicate responses in the
///  background for the grace period. Call [HttpClient::finish] before shutting down so the
///  server gets to see the acknowledgement.
pub struct HttpClient {
    config: ClientConfig,
    transport: Arc<TransportConfig>,
    drains: JoinSet<()>,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> anyhow::Result<HttpClient> {
        config.validate()?;
        let transport = Arc::new(config.transport.clone());
        Ok(HttpClient {
            config,
            transport,
            drains: JoinSet::new(),
        })
    }

    /// Sends `request` to `uri`, following redirects. The request's target and `Host` header are
    ///  taken from the URL.
    pub async fn send(&mut self, uri: &Uri, mut request: Request<Bytes>) -> anyhow::Result<Response<Bytes>> {
        let mut uri = uri.clone();
        let mut num_redirects = 0;

        loop {
            *request.uri_mut() = request_target(&uri).parse()?;
            request.headers_mut().insert(HOST, HeaderValue::from_str(&authority(&uri)?)?);

            debug!("sending {} {}", request.method(), uri);
            let raw = self.exchange_once(&uri, request_to_bytes(&request)).await?;
            let response = parse_response(&raw)?;

            if !response.status().is_redirection() {
                return Ok(response);
            }

            let location = response.headers().get(LOCATION)
                .ok_or_else(|| anyhow!("{} response without {} header", response.status(), LOCATION))?
                .to_str()?;
            if num_redirects >= self.config.max_redirects {
                bail!("too many redirects: giving up at {}", location);
            }
            num_redirects += 1;

            uri = join(&uri, location)?;
            info!("redirected to {}", uri);
        }
    }

    /// One request / response exchange on a fresh socket
    async fn exchange_once(&mut self, uri: &Uri, request: Bytes) -> anyhow::Result<Bytes> {
        let max_payload_len = self.transport.max_payload_len();
        if request.len() > max_payload_len {
            return Err(FrameError::PayloadTooLarge { len: request.len(), max: max_payload_len }.into());
        }

        let server = resolve(uri).await?;
        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        debug!("exchanging with {} from {:?}", server, socket.local_addr()?);

        let sender = RelaySocket::new(socket.clone(), self.transport.relay_addr, self.transport.max_datagram_len);
        let mut source = PeerFilteredSocket::new(socket, server, self.transport.max_datagram_len);
        let mut session = ClientSession::new(server, request);

        let response = exchange(&mut session, &mut source, &sender, &self.transport).await?;

        let transport = self.transport.clone();
        self.drains.spawn(async move {
            if let Err(e) = drain(&mut session, &mut source, &sender, &transport).await {
                warn!("error while draining session: {}", e);
            }
        }.instrument(info_span!("drain", %server)));

        Ok(response)
    }

    /// waits until all sessions passed their grace period
    pub async fn finish(&mut self) {
        while let Some(result) = self.drains.join_next().await {
            if let Err(e) = result {
                warn!("drain task failed: {}", e);
            }
        }
    }
}

async fn resolve(uri: &Uri) -> anyhow::Result<SocketAddrV4> {
    let (host, port) = host_port(uri)?;
    lookup_host((host, port)).await?
        .find_map(|addr| match addr {
            std::net::SocketAddr::V4(addr) => Some(addr),
            std::net::SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| anyhow!("{} does not resolve to an IPv4 address", host))
}
