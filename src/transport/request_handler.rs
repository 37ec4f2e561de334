use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;

/// The application side of a server: turns a request payload into a response payload. The
///  transport treats both as opaque bytes.
///
/// This is called on the session's own worker, so it may take as long as it needs without
///  affecting other peers.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, peer: SocketAddr, request: Bytes) -> Bytes;

    /// Sent instead of a response of `len` bytes that does not fit into a frame's `max` payload
    ///  bytes. The exchange completes with it, so the client is not left retransmitting its
    ///  request. Anything beyond `max` bytes is cut off.
    fn response_too_large(&self, _len: usize, _max: usize) -> Bytes {
        Bytes::new()
    }
}
