//! Retransmission and duplicate handling shared by client and server sessions.
//!
//! Sessions are state machines that never perform I/O themselves: they are fed inbound frames
//!  and timeouts, and answer with the frames to send. [step] is the only suspension point,
//!  i.e. the "await frame with timeout" of the protocol.

use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::trace;
use crate::transport::config::TransportConfig;
use crate::transport::frame::Frame;
use crate::transport::send_socket::{FrameSender, FrameSource};

/// What a session is waiting for. This determines how long it may block waiting for the next
///  inbound frame before its timeout handling kicks in.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Wait {
    /// nothing in flight, and the peer is responsible for retransmitting
    Forever,
    /// a frame is in flight since `since` and will be re-sent when the retransmit timeout
    ///  passes without an acknowledgement
    Retransmit { since: Instant },
    /// the exchange is complete, only duplicates are still answered
    Grace,
    /// nothing in flight, but the session gives up if the peer stays silent
    Idle,
    Closed,
}

impl Wait {
    pub fn timeout(self, config: &TransportConfig) -> Option<Duration> {
        match self {
            Wait::Forever | Wait::Closed => None,
            Wait::Retransmit { since } => Some(config.retransmit_timeout.saturating_sub(since.elapsed())),
            Wait::Grace => Some(config.grace_period),
            Wait::Idle => Some(config.idle_timeout),
        }
    }
}

/// The single unacknowledged frame of a stop-and-wait sender. While armed, a timeout re-sends
///  exactly the same frame (same sequence bit, same payload).
///
/// The retransmission deadline counts from the last time the frame was sent, so stale frames
///  arriving in between do not postpone it.
#[derive(Debug)]
pub struct InFlight {
    frame: Option<Frame>,
    sent_at: Instant,
}

impl Default for InFlight {
    fn default() -> Self {
        InFlight {
            frame: None,
            sent_at: Instant::now(),
        }
    }
}

impl InFlight {
    /// returns the frame so it can be sent right away
    pub fn arm(&mut self, frame: Frame) -> Frame {
        self.frame = Some(frame.clone());
        self.sent_at = Instant::now();
        frame
    }

    pub fn disarm(&mut self) {
        self.frame = None;
    }

    pub fn is_armed(&self) -> bool {
        self.frame.is_some()
    }

    pub fn resend(&mut self) -> Option<Frame> {
        if self.frame.is_some() {
            self.sent_at = Instant::now();
        }
        self.frame.clone()
    }

    /// `Retransmit` while a frame is in flight, `otherwise` if not
    pub fn wait_or(&self, otherwise: Wait) -> Wait {
        match self.frame {
            Some(_) => Wait::Retransmit { since: self.sent_at },
            None => otherwise,
        }
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum Event {
    Frame(Frame),
    Timeout,
}

pub trait SessionMachine {
    fn wait(&self) -> Wait;

    /// returns the frames to send in reaction
    fn on_frame(&mut self, frame: &Frame) -> Vec<Frame>;

    /// returns the frames to send in reaction
    fn on_timeout(&mut self) -> Vec<Frame>;
}

pub async fn next_event<S: FrameSource + ?Sized>(source: &mut S, wait_for: Option<Duration>) -> anyhow::Result<Event> {
    match wait_for {
        None => Ok(Event::Frame(source.recv_frame().await?)),
        Some(duration) => match timeout(duration, source.recv_frame()).await {
            Ok(frame) => Ok(Event::Frame(frame?)),
            Err(_) => Ok(Event::Timeout),
        }
    }
}

pub async fn send_all(sender: &dyn FrameSender, frames: Vec<Frame>) -> anyhow::Result<()> {
    for frame in frames {
        sender.send_frame(&frame).await?;
    }
    Ok(())
}

/// Wait for the next frame or timeout, feed it to the session, and send whatever the session
///  answers. A closed session is left alone.
pub async fn step<M: SessionMachine, S: FrameSource + ?Sized>(
    machine: &mut M,
    source: &mut S,
    sender: &dyn FrameSender,
    config: &TransportConfig,
) -> anyhow::Result<()> {
    let wait = machine.wait();
    if wait == Wait::Closed {
        return Ok(());
    }

    let reaction = match next_event(source, wait.timeout(config)).await? {
        Event::Frame(frame) => machine.on_frame(&frame),
        Event::Timeout => {
            trace!("timeout while waiting ({:?})", wait);
            machine.on_timeout()
        }
    };
    send_all(sender, reaction).await
}
