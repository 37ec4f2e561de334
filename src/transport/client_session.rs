use std::net::SocketAddrV4;
use bytes::Bytes;
use tracing::{debug, info, trace};
use crate::transport::config::TransportConfig;
use crate::transport::frame::{Frame, FrameKind};
use crate::transport::send_socket::{FrameSender, FrameSource};
use crate::transport::seq::SeqBit;
use crate::transport::stop_and_wait::{send_all, step, InFlight, SessionMachine, Wait};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClientState {
    Init,
    /// `SYN` sent, waiting for `SYN_ACK`
    Handshaking,
    /// handshake complete from the client's perspective, request not sent yet
    SendingRequest,
    /// request sent; the in-flight request is disarmed when the server acknowledges it
    AwaitingResponse,
    /// response delivered, absorbing duplicate responses during the grace window
    Done,
    Closed,
}

/// Client side of one request / response exchange.
///
/// The client does not wait for its handshake `ACK` to be acknowledged: it follows up with the
///  request right away, and the server treats the request as implicit completion of the
///  handshake if the `ACK` got lost.
pub struct ClientSession {
    server: SocketAddrV4,
    request: Bytes,
    state: ClientState,
    in_flight: InFlight,
    response: Option<Bytes>,
}

impl ClientSession {
    pub fn new(server: SocketAddrV4, request: Bytes) -> ClientSession {
        ClientSession {
            server,
            request,
            state: ClientState::Init,
            in_flight: InFlight::default(),
            response: None,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn server(&self) -> SocketAddrV4 {
        self.server
    }

    /// The response is handed out exactly once, duplicates received afterwards are only
    ///  acknowledged.
    pub fn take_response(&mut self) -> Option<Bytes> {
        self.response.take()
    }

    pub fn start(&mut self) -> Vec<Frame> {
        if self.state != ClientState::Init {
            return Vec::new();
        }

        debug!("initiating handshake with {}", self.server);
        self.state = ClientState::Handshaking;
        vec![self.in_flight.arm(Frame::control(FrameKind::Syn, SeqBit::HANDSHAKE, self.server))]
    }

    fn ack(&self, seq: SeqBit) -> Frame {
        Frame::control(FrameKind::Ack, seq, self.server)
    }

    /// The request goes out right after the handshake `ACK`, see [exchange].
    pub fn send_request(&mut self) -> Vec<Frame> {
        if self.state != ClientState::SendingRequest {
            return Vec::new();
        }

        debug!("sending request ({} bytes)", self.request.len());
        self.state = ClientState::AwaitingResponse;
        vec![self.in_flight.arm(Frame::data(SeqBit::DATA, self.server, self.request.clone()))]
    }

    fn on_syn_ack(&mut self) -> Vec<Frame> {
        debug!("SYN_ACK received - handshake complete");
        self.in_flight.disarm();
        self.state = ClientState::SendingRequest;
        vec![self.ack(SeqBit::HANDSHAKE)]
    }
}

impl SessionMachine for ClientSession {
    fn wait(&self) -> Wait {
        match self.state {
            // nothing to wait for until the request is sent
            ClientState::Init | ClientState::SendingRequest | ClientState::Closed => Wait::Closed,
            ClientState::Handshaking | ClientState::AwaitingResponse => self.in_flight.wait_or(Wait::Forever),
            ClientState::Done => Wait::Grace,
        }
    }

    fn on_frame(&mut self, frame: &Frame) -> Vec<Frame> {
        trace!("{:?}: received {:?}", self.state, frame);

        match (self.state, frame.kind) {
            (ClientState::Handshaking, FrameKind::SynAck) => self.on_syn_ack(),
            (ClientState::AwaitingResponse, FrameKind::Ack) if frame.seq == SeqBit::DATA => {
                if self.in_flight.is_armed() {
                    debug!("request acknowledged, waiting for response");
                    self.in_flight.disarm();
                }
                Vec::new()
            }
            (ClientState::AwaitingResponse, FrameKind::Data) => {
                debug!("response received");
                self.in_flight.disarm();
                self.response = Some(frame.payload.clone());
                self.state = ClientState::Done;
                vec![self.ack(frame.seq)]
            }
            (ClientState::Done, FrameKind::Data) => {
                debug!("duplicate response received - acknowledging again");
                vec![self.ack(frame.seq)]
            }
            (state, kind) => {
                debug!("{:?}: ignoring stale {:?} frame", state, kind);
                Vec::new()
            }
        }
    }

    fn on_timeout(&mut self) -> Vec<Frame> {
        match self.state {
            ClientState::Done => {
                debug!("grace period elapsed - closing session");
                self.state = ClientState::Closed;
                Vec::new()
            }
            state => match self.in_flight.resend() {
                Some(frame) => {
                    debug!("{:?}: timeout - re-sending {:?}", state, frame.kind);
                    vec![frame]
                }
                None => Vec::new(),
            }
        }
    }
}

/// Drive a session until its response arrives. There is no limit on retries: callers that need
///  bounded latency wrap this in their own deadline.
pub async fn exchange<S: FrameSource + ?Sized>(
    session: &mut ClientSession,
    source: &mut S,
    sender: &dyn FrameSender,
    config: &TransportConfig,
) -> anyhow::Result<Bytes> {
    send_all(sender, session.start()).await?;

    loop {
        step(session, source, sender, config).await?;
        send_all(sender, session.send_request()).await?;

        if let Some(response) = session.take_response() {
            info!("received response from {} ({} bytes)", session.server(), response.len());
            return Ok(response);
        }
    }
}

/// Keep acknowledging duplicate responses until the grace window passes without any.
pub async fn drain<S: FrameSource + ?Sized>(
    session: &mut ClientSession,
    source: &mut S,
    sender: &dyn FrameSender,
    config: &TransportConfig,
) -> anyhow::Result<()> {
    while session.state() != ClientState::Closed {
        step(session, source, sender, config).await?;
    }
    trace!("session with {} closed", session.server());
    Ok(())
}
