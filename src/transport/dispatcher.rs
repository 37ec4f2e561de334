use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use rustc_hash::FxHashMap;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendError;
use tracing::{debug, error, info, info_span, trace, Instrument};
use uuid::Uuid;
use crate::transport::config::TransportConfig;
use crate::transport::frame::Frame;
use crate::transport::request_handler::RequestHandler;
use crate::transport::send_socket::{FrameSender, RelaySocket};
use crate::transport::server_session::{run_session, ServerSession};

struct SessionHandle {
    id: Uuid,
    queue: mpsc::UnboundedSender<Frame>,
}

/// The server's listening loop. It owns the receiving side of the socket and does nothing but
///  demultiplex: every inbound frame goes to the queue of its peer's session worker, and a
///  worker is spawned for peers without one. Workers share the socket for sending.
///
/// The session table is owned by the receive loop and only ever touched there. Workers report
///  their termination through a channel, tagged with their session id so that a notification
///  from a finished session does not evict a fresh session for the same peer.
pub struct Dispatcher {
    socket: Arc<UdpSocket>,
    sender: Arc<dyn FrameSender>,
    handler: Arc<dyn RequestHandler>,
    config: Arc<TransportConfig>,
    num_sessions: Arc<AtomicUsize>,
}

impl Dispatcher {
    pub async fn bind(
        addr: SocketAddr,
        handler: Arc<dyn RequestHandler>,
        config: Arc<TransportConfig>,
    ) -> anyhow::Result<Dispatcher> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("bound server socket to {:?}, relay is {:?}", socket.local_addr()?, config.relay_addr);

        let sender = Arc::new(RelaySocket::new(socket.clone(), config.relay_addr, config.max_datagram_len));
        Ok(Dispatcher {
            socket,
            sender,
            handler,
            config,
            num_sessions: Default::default(),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// number of sessions currently in the session table
    pub fn num_sessions(&self) -> usize {
        self.num_sessions.load(Ordering::Acquire)
    }

    /// Runs until the socket fails. Malformed datagrams are dropped.
    pub async fn recv_loop(&self) -> anyhow::Result<()> {
        info!("starting receive loop");

        let mut sessions: FxHashMap<SocketAddrV4, SessionHandle> = FxHashMap::default();
        let (closed_sender, mut closed_receiver) = mpsc::unbounded_channel();

        let max_datagram_len = self.config.max_datagram_len;
        let mut buf = vec![0u8; max_datagram_len + 1];
        loop {
            select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (len, from) = match received {
                        Ok(x) => x,
                        Err(e) => {
                            error!("socket error: {}", e);
                            return Err(e.into());
                        }
                    };
                    if len > max_datagram_len {
                        debug!("oversized datagram from {:?} - dropping", from);
                        continue;
                    }

                    match Frame::deser(&buf[..len]) {
                        Ok(frame) => {
                            trace!("received {:?} from {:?}", frame, from);
                            self.dispatch(&mut sessions, &closed_sender, frame);
                        }
                        Err(e) => {
                            debug!("malformed frame from {:?}: {} - dropping", from, e);
                        }
                    }
                }
                Some((peer, id)) = closed_receiver.recv() => {
                    if sessions.get(&peer).map(|handle| handle.id) == Some(id) {
                        debug!("removing session {} for {}", id, peer);
                        sessions.remove(&peer);
                    }
                }
            }
            self.num_sessions.store(sessions.len(), Ordering::Release);
        }
    }

    fn dispatch(
        &self,
        sessions: &mut FxHashMap<SocketAddrV4, SessionHandle>,
        closed_sender: &mpsc::UnboundedSender<(SocketAddrV4, Uuid)>,
        frame: Frame,
    ) {
        let peer = frame.peer;

        let frame = match sessions.get(&peer) {
            Some(handle) => match handle.queue.send(frame) {
                Ok(()) => return,
                Err(SendError(frame)) => {
                    debug!("session {} for {} has terminated - starting a new one", handle.id, peer);
                    frame
                }
            }
            None => frame,
        };

        let handle = self.spawn_session(peer, closed_sender.clone());
        if handle.queue.send(frame).is_err() {
            error!("newly spawned session for {} rejected its first frame", peer);
        }
        sessions.insert(peer, handle);
    }

    fn spawn_session(&self, peer: SocketAddrV4, closed_sender: mpsc::UnboundedSender<(SocketAddrV4, Uuid)>) -> SessionHandle {
        let id = Uuid::new_v4();
        let (queue, mut inbox) = mpsc::unbounded_channel();
        debug!("starting session {} for {}", id, peer);

        let sender = self.sender.clone();
        let handler = self.handler.clone();
        let config = self.config.clone();
        let span = info_span!("session", %peer, %id);
        tokio::spawn(async move {
            let mut session = ServerSession::new(peer);
            if let Err(e) = run_session(&mut session, &mut inbox, sender.as_ref(), &handler, &config).await {
                error!("session terminated in state {:?}: {}", session.state(), e);
            }
            if closed_sender.send((peer, id)).is_err() {
                trace!("dispatcher is gone");
            }
        }.instrument(span));

        SessionHandle { id, queue }
    }
}
