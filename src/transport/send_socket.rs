use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use anyhow::bail;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use crate::error::FrameError;
use crate::transport::frame::Frame;

/// This is an abstraction for sending a frame, introduced to facilitate mocking the I/O part
///  away for testing.
///
/// Implementations must be safe to call concurrently from several sessions: every frame is
///  sent as a single datagram, so concurrent sends cannot interleave on the wire.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FrameSender: Send + Sync + 'static {
    async fn send_frame(&self, frame: &Frame) -> anyhow::Result<()>;
}

/// Sends every frame to the relay, which forwards it to the frame's embedded peer address.
pub struct RelaySocket {
    socket: Arc<UdpSocket>,
    relay_addr: SocketAddr,
    max_datagram_len: usize,
}

impl RelaySocket {
    pub fn new(socket: Arc<UdpSocket>, relay_addr: SocketAddr, max_datagram_len: usize) -> RelaySocket {
        RelaySocket {
            socket,
            relay_addr,
            max_datagram_len,
        }
    }
}

#[async_trait]
impl FrameSender for RelaySocket {
    async fn send_frame(&self, frame: &Frame) -> anyhow::Result<()> {
        if frame.serialized_len() > self.max_datagram_len {
            return Err(FrameError::PayloadTooLarge {
                len: frame.payload.len(),
                max: self.max_datagram_len - Frame::HEADER_LEN,
            }.into());
        }

        trace!("sending {:?} via {:?}", frame, self.relay_addr);
        self.socket.send_to(&frame.to_bytes(), self.relay_addr).await?;
        Ok(())
    }
}

/// The receiving side of a session: yields inbound frames in the order they arrived.
#[async_trait]
pub trait FrameSource: Send {
    async fn recv_frame(&mut self) -> anyhow::Result<Frame>;
}

/// Server sessions receive their frames through a queue fed by the dispatcher.
#[async_trait]
impl FrameSource for mpsc::UnboundedReceiver<Frame> {
    async fn recv_frame(&mut self) -> anyhow::Result<Frame> {
        match self.recv().await {
            Some(frame) => Ok(frame),
            None => bail!("session queue was closed by the dispatcher"),
        }
    }
}

/// A client reads frames directly from its own socket. Datagrams that do not decode, or that
///  come from a peer other than the server this client talks to, are dropped.
pub struct PeerFilteredSocket {
    socket: Arc<UdpSocket>,
    server: SocketAddrV4,
    buf: Vec<u8>,
}

impl PeerFilteredSocket {
    pub fn new(socket: Arc<UdpSocket>, server: SocketAddrV4, max_datagram_len: usize) -> PeerFilteredSocket {
        PeerFilteredSocket {
            socket,
            server,
            // one extra byte to detect oversized datagrams
            buf: vec![0; max_datagram_len + 1],
        }
    }
}

#[async_trait]
impl FrameSource for PeerFilteredSocket {
    async fn recv_frame(&mut self) -> anyhow::Result<Frame> {
        let max_datagram_len = self.buf.len() - 1;
        loop {
            let (len, from) = self.socket.recv_from(&mut self.buf).await?;
            if len > max_datagram_len {
                debug!("oversized datagram from {:?} - dropping", from);
                continue;
            }

            match Frame::deser(&self.buf[..len]) {
                Ok(frame) if frame.peer == self.server => {
                    trace!("received {:?}", frame);
                    return Ok(frame);
                }
                Ok(frame) => {
                    debug!("received {:?} for a different peer than {} - dropping", frame, self.server);
                }
                Err(e) => {
                    debug!("malformed frame from {:?}: {} - dropping", from, e);
                }
            }
        }
    }
}
