use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use bytes::Bytes;
use tracing::{debug, error, info, trace};
use crate::transport::config::TransportConfig;
use crate::transport::frame::{Frame, FrameKind};
use crate::transport::request_handler::RequestHandler;
use crate::transport::send_socket::{FrameSender, FrameSource};
use crate::transport::seq::SeqBit;
use crate::transport::stop_and_wait::{send_all, step, InFlight, SessionMachine, Wait};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ServerState {
    AwaitSyn,
    /// `SYN_ACK` sent, waiting for the handshake `ACK`
    Handshaking,
    AwaitRequest,
    /// request acknowledged and handed to the application
    Processing,
    /// response in flight, re-sent until the client acknowledges it
    SendingResponse,
    /// response acknowledged, answering late duplicates during the grace window
    Draining,
    Closed,
}

/// Server side of one peer's request / response exchange. It mirrors [ClientSession]: the
///  server never retransmits its `SYN_ACK` or its request `ACK`, it answers the client's
///  retransmissions instead. The response is the only frame the server retransmits.
///
/// The request is handed to the application at most once per session. Duplicates of the
///  request only trigger another `ACK`, and a re-sent response is the cached response bytes.
///
/// [ClientSession]: crate::transport::client_session::ClientSession
pub struct ServerSession {
    client: SocketAddrV4,
    state: ServerState,
    in_flight: InFlight,
    request: Option<Bytes>,
}

impl ServerSession {
    pub fn new(client: SocketAddrV4) -> ServerSession {
        ServerSession {
            client,
            state: ServerState::AwaitSyn,
            in_flight: InFlight::default(),
            request: None,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn client(&self) -> SocketAddrV4 {
        self.client
    }

    /// The request is available once, after it was received and acknowledged.
    pub fn take_request(&mut self) -> Option<Bytes> {
        self.request.take()
    }

    pub fn on_response(&mut self, response: Bytes) -> Vec<Frame> {
        if self.state != ServerState::Processing {
            debug!("{:?}: ignoring response outside of request processing", self.state);
            return Vec::new();
        }

        self.state = ServerState::SendingResponse;
        vec![self.in_flight.arm(Frame::data(SeqBit::DATA, self.client, response))]
    }

    fn control(&self, kind: FrameKind, seq: SeqBit) -> Frame {
        Frame::control(kind, seq, self.client)
    }

    fn on_request(&mut self, frame: &Frame) -> Vec<Frame> {
        debug!("request received ({} bytes)", frame.payload.len());
        self.request = Some(frame.payload.clone());
        self.state = ServerState::Processing;
        vec![self.control(FrameKind::Ack, frame.seq)]
    }
}

impl SessionMachine for ServerSession {
    fn wait(&self) -> Wait {
        match self.state {
            ServerState::AwaitSyn => Wait::Idle,
            // the client retransmits SYN or its request until it hears from us
            ServerState::Handshaking | ServerState::AwaitRequest | ServerState::Processing => Wait::Forever,
            ServerState::SendingResponse => self.in_flight.wait_or(Wait::Forever),
            ServerState::Draining => Wait::Grace,
            ServerState::Closed => Wait::Closed,
        }
    }

    fn on_frame(&mut self, frame: &Frame) -> Vec<Frame> {
        trace!("{:?}: received {:?}", self.state, frame);

        match (self.state, frame.kind) {
            (ServerState::AwaitSyn, FrameKind::Syn) => {
                debug!("SYN received - sending SYN_ACK");
                self.state = ServerState::Handshaking;
                vec![self.control(FrameKind::SynAck, frame.seq)]
            }
            (ServerState::Handshaking, FrameKind::Syn) => {
                debug!("duplicate SYN - sending SYN_ACK again");
                vec![self.control(FrameKind::SynAck, frame.seq)]
            }
            (ServerState::Handshaking, FrameKind::Ack) if frame.seq == SeqBit::HANDSHAKE => {
                debug!("handshake complete");
                self.state = ServerState::AwaitRequest;
                Vec::new()
            }
            (ServerState::Handshaking, FrameKind::Data) => {
                debug!("request received before handshake ACK - treating handshake as complete");
                self.on_request(frame)
            }
            (ServerState::AwaitRequest, FrameKind::Data) => self.on_request(frame),
            (ServerState::Processing | ServerState::SendingResponse | ServerState::Draining, FrameKind::Data) => {
                debug!("{:?}: duplicate request - acknowledging again", self.state);
                vec![self.control(FrameKind::Ack, frame.seq)]
            }
            (ServerState::SendingResponse, FrameKind::Ack) if frame.seq == SeqBit::DATA => {
                debug!("response acknowledged");
                self.in_flight.disarm();
                self.state = ServerState::Draining;
                Vec::new()
            }
            (state, kind) => {
                debug!("{:?}: ignoring stale {:?} frame", state, kind);
                Vec::new()
            }
        }
    }

    fn on_timeout(&mut self) -> Vec<Frame> {
        match self.state {
            ServerState::SendingResponse => match self.in_flight.resend() {
                Some(frame) => {
                    debug!("timeout - re-sending response");
                    vec![frame]
                }
                None => Vec::new(),
            },
            ServerState::Draining => {
                debug!("grace period elapsed - closing session");
                self.state = ServerState::Closed;
                Vec::new()
            }
            ServerState::AwaitSyn => {
                debug!("no SYN from peer - closing session");
                self.state = ServerState::Closed;
                Vec::new()
            }
            ServerState::Handshaking | ServerState::AwaitRequest | ServerState::Processing | ServerState::Closed => Vec::new(),
        }
    }
}

/// The body of a per-peer worker: runs one session to completion, invoking the application
///  exactly once if a request arrives.
pub async fn run_session<S: FrameSource + ?Sized>(
    session: &mut ServerSession,
    source: &mut S,
    sender: &dyn FrameSender,
    handler: &Arc<dyn RequestHandler>,
    config: &TransportConfig,
) -> anyhow::Result<()> {
    while session.state() != ServerState::Closed {
        step(session, source, sender, config).await?;

        if let Some(request) = session.take_request() {
            let mut response = handler.handle(SocketAddr::V4(session.client()), request).await;

            let max_payload_len = config.max_payload_len();
            if response.len() > max_payload_len {
                error!("response of {} bytes does not fit into a single frame - sending a replacement", response.len());
                response = handler.response_too_large(response.len(), max_payload_len);
                response.truncate(max_payload_len);
            }
            send_all(sender, session.on_response(response)).await?;
        }
    }

    info!("session with {} closed", session.client());
    Ok(())
}
