use std::net::{SocketAddr, SocketAddrV4};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};
use crate::transport::frame::{Frame, FrameKind};
use crate::transport::seq::SeqBit;

/// What happens to a single frame passing through the relay
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
    Forward,
    Drop,
    /// forward after the given time, letting later frames overtake this one
    Delay(Duration),
    /// forward twice
    Duplicate,
}

pub trait FaultPolicy: Send + 'static {
    /// `from` is the sender of the frame, `frame.peer` its destination
    fn verdict(&mut self, frame: &Frame, from: SocketAddrV4) -> Verdict;
}

pub struct NoFaults;

impl FaultPolicy for NoFaults {
    fn verdict(&mut self, _frame: &Frame, _from: SocketAddrV4) -> Verdict {
        Verdict::Forward
    }
}

/// Drops, duplicates and delays frames at random. With a fixed seed, the sequence of verdicts
///  is reproducible.
pub struct RandomFaults {
    rng: StdRng,
    drop_rate: f64,
    duplicate_rate: f64,
    max_delay: Duration,
}

impl RandomFaults {
    pub fn new(drop_rate: f64, duplicate_rate: f64, max_delay: Duration, seed: Option<u64>) -> anyhow::Result<RandomFaults> {
        if !(0.0..=1.0).contains(&drop_rate) || !(0.0..=1.0).contains(&duplicate_rate) {
            anyhow::bail!("rates must be between 0.0 and 1.0");
        }

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(RandomFaults {
            rng,
            drop_rate,
            duplicate_rate,
            max_delay,
        })
    }
}

impl FaultPolicy for RandomFaults {
    fn verdict(&mut self, _frame: &Frame, _from: SocketAddrV4) -> Verdict {
        if self.rng.gen_bool(self.drop_rate) {
            return Verdict::Drop;
        }
        if self.rng.gen_bool(self.duplicate_rate) {
            return Verdict::Duplicate;
        }
        if self.max_delay.is_zero() {
            return Verdict::Forward;
        }
        let millis = self.rng.gen_range(0..=self.max_delay.as_millis() as u64);
        Verdict::Delay(Duration::from_millis(millis))
    }
}

struct DropRule {
    kind: FrameKind,
    seq: Option<SeqBit>,
    from: Option<SocketAddrV4>,
    num_seen: usize,
    /// positions (counting from 1) of the matching frames that are dropped
    drop: RangeInclusive<usize>,
}

impl DropRule {
    fn matches(&self, frame: &Frame, from: SocketAddrV4) -> bool {
        self.kind == frame.kind
            && self.seq.map_or(true, |seq| seq == frame.seq)
            && self.from.map_or(true, |f| f == from)
    }
}

/// Deterministic loss: each rule drops the first (or n-th, or first n) frames matching it.
///  Everything else is forwarded.
#[derive(Default)]
pub struct DropFirst {
    rules: Vec<DropRule>,
}

impl DropFirst {
    pub fn new() -> DropFirst {
        Default::default()
    }

    /// drop the first frame of `kind`, regardless of who sent it
    pub fn kind(self, kind: FrameKind) -> DropFirst {
        self.rule(kind, None, None, 1..=1)
    }

    /// drop the first frame of `kind` sent by `from`
    pub fn kind_from(self, kind: FrameKind, from: SocketAddrV4) -> DropFirst {
        self.rule(kind, None, Some(from), 1..=1)
    }

    /// drop the `n`-th frame (counting from 1) of `kind` with sequence bit `seq`
    pub fn nth(self, n: usize, kind: FrameKind, seq: SeqBit) -> DropFirst {
        self.rule(kind, Some(seq), None, n..=n)
    }

    /// drop the first `n` frames of `kind` with sequence bit `seq`
    pub fn first(self, n: usize, kind: FrameKind, seq: SeqBit) -> DropFirst {
        self.rule(kind, Some(seq), None, 1..=n)
    }

    fn rule(mut self, kind: FrameKind, seq: Option<SeqBit>, from: Option<SocketAddrV4>, drop: RangeInclusive<usize>) -> DropFirst {
        self.rules.push(DropRule { kind, seq, from, num_seen: 0, drop });
        self
    }
}

impl FaultPolicy for DropFirst {
    fn verdict(&mut self, frame: &Frame, from: SocketAddrV4) -> Verdict {
        let mut verdict = Verdict::Forward;
        for rule in &mut self.rules {
            if rule.matches(frame, from) {
                rule.num_seen += 1;
                if rule.drop.contains(&rule.num_seen) {
                    verdict = Verdict::Drop;
                }
            }
        }
        verdict
    }
}

/// The router between clients and servers: every frame it receives is forwarded to the peer
///  address embedded in the frame, with that address replaced by the frame's sender. A
///  [FaultPolicy] decides what happens to each frame on the way.
///
/// The policy is passed to [Relay::run] rather than when binding, so it can refer to the
///  addresses of endpoints that need the relay's address to be set up.
pub struct Relay {
    socket: Arc<UdpSocket>,
}

impl Relay {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Relay> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("relay listening on {:?}", socket.local_addr()?);
        Ok(Relay { socket })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(self, mut policy: Box<dyn FaultPolicy>) -> anyhow::Result<()> {
        let mut buf = vec![0u8; 65536];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            let from = match from {
                SocketAddr::V4(from) => from,
                SocketAddr::V6(from) => {
                    debug!("dropping datagram from IPv6 address {:?}", from);
                    continue;
                }
            };

            let frame = match Frame::deser(&buf[..len]) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("malformed frame from {:?}: {} - dropping", from, e);
                    continue;
                }
            };

            let destination = frame.peer;
            let verdict = policy.verdict(&frame, from);
            trace!("{:?} from {} to {}: {:?}", frame.kind, from, destination, verdict);

            let forwarded = frame.with_peer(from);
            match verdict {
                Verdict::Forward => self.forward(&forwarded, destination).await,
                Verdict::Drop => debug!("dropping {:?} from {} to {}", forwarded.kind, from, destination),
                Verdict::Duplicate => {
                    self.forward(&forwarded, destination).await;
                    self.forward(&forwarded, destination).await;
                }
                Verdict::Delay(delay) => {
                    let socket = self.socket.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        send(&socket, &forwarded, destination).await;
                    });
                }
            }
        }
    }

    async fn forward(&self, frame: &Frame, destination: SocketAddrV4) {
        send(&self.socket, frame, destination).await
    }
}

/// Failing to reach one destination must not stop the relay.
async fn send(socket: &UdpSocket, frame: &Frame, destination: SocketAddrV4) {
    if let Err(e) = socket.send_to(&frame.to_bytes(), destination).await {
        warn!("error forwarding to {}: {}", destination, e);
    }
}
