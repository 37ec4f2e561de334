use std::net::SocketAddr;
use std::time::Duration;
use anyhow::bail;
use crate::transport::frame::Frame;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Every frame is sent to the relay, which forwards it based on the frame's embedded peer
    ///  address.
    pub relay_addr: SocketAddr,

    /// Time to wait for an acknowledgement (or `SYN_ACK`) before re-sending the frame in flight.
    ///  There is no limit on the number of re-sends.
    pub retransmit_timeout: Duration,

    /// After an exchange completed, a session stays around this long to answer duplicate
    ///  frames that are still on the wire. It restarts with every duplicate, and must be longer
    ///  than the retransmit timeout to cover the peer's next retransmission.
    pub grace_period: Duration,

    /// A server session that has not seen a `SYN` is closed if it receives no frame for this
    ///  long. This bounds the lifetime of sessions created by stray duplicates. Once the
    ///  handshake started, the client retransmits until it is served, so there is no timeout.
    pub idle_timeout: Duration,

    /// Maximum size of a datagram, including the frame header. Messages must fit into a
    ///  single frame.
    pub max_datagram_len: usize,
}

impl TransportConfig {
    pub fn new(relay_addr: SocketAddr) -> TransportConfig {
        TransportConfig {
            relay_addr,
            retransmit_timeout: Duration::from_secs(2),
            grace_period: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            max_datagram_len: 1024,
        }
    }

    pub fn max_payload_len(&self) -> usize {
        self.max_datagram_len.saturating_sub(Frame::HEADER_LEN)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retransmit_timeout.is_zero() {
            bail!("retransmit timeout must be positive");
        }
        if self.grace_period <= self.retransmit_timeout {
            bail!("grace period must be longer than the retransmit timeout");
        }
        if self.idle_timeout.is_zero() {
            bail!("idle timeout must be positive");
        }
        if self.max_datagram_len <= Frame::HEADER_LEN {
            bail!("maximum datagram length {} leaves no room for payload", self.max_datagram_len);
        }
        if self.max_datagram_len > 65507 {
            bail!("maximum datagram length {} exceeds the UDP payload limit", self.max_datagram_len);
        }
        Ok(())
    }
}
