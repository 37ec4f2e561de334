//! The same file service over plain HTTP on TCP. The stream is reliable, so there is no
//!  handshake or retransmission at this level, and no limit on the size of a message.

use std::net::SocketAddr;
use std::sync::Arc;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Error, Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, info_span, Instrument};
use crate::http::handler::FileRequestHandler;

pub struct TcpFileServer {
    listener: TcpListener,
    handler: Arc<FileRequestHandler>,
}

impl TcpFileServer {
    pub async fn bind(addr: SocketAddr, handler: Arc<FileRequestHandler>) -> anyhow::Result<TcpFileServer> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on http://{}", listener.local_addr()?);
        Ok(TcpFileServer { listener, handler })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the listener fails, serving each connection in its own task.
    pub async fn run(&self) -> anyhow::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!("accepted connection from {:?}", peer);
            let io = TokioIo::new(stream);

            let handler = self.handler.clone();
            let service = service_fn(move |request| {
                let handler = handler.clone();
                async move { handle_request(&handler, peer, request).await }
            });

            tokio::spawn(async move {
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("error serving connection: {:?}", err);
                }
            }.instrument(info_span!("tcp", %peer)));
        }
    }
}

async fn handle_request(handler: &FileRequestHandler, peer: SocketAddr, request: Request<Incoming>) -> Result<Response<Full<Bytes>>, Error> {
    let (parts, body) = request.into_parts();
    let body = body.collect().await?.to_bytes();

    let response = handler.serve(Request::from_parts(parts, body)).await;
    info!("{} -> {}", peer, response.status());
    Ok(response.map(Full::new))
}

/// client side: one connection per request
pub async fn send_over_tcp(server: SocketAddr, request: Request<Bytes>) -> anyhow::Result<Response<Bytes>> {
    let stream = TcpStream::connect(server).await?;
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!("error on connection to {}: {:?}", server, err);
        }
    });

    let response = sender.send_request(request.map(Full::new)).await?;
    let (parts, body) = response.into_parts();
    let body = body.collect().await?.to_bytes();
    Ok(Response::from_parts(parts, body))
}
