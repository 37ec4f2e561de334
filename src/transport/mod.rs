//! A minimal reliable request / response transport on top of UDP. Every exchange carries exactly
//!  one request message from a client to a server and exactly one response back, each of which
//!  must fit into a single datagram.
//!
//! ## Topology
//!
//! Client and server never talk to each other directly. Every datagram goes to a relay, and
//!  every frame carries the address of the *other* endpoint in its header: when sending, that
//!  is the destination the relay forwards to; when receiving, the relay has replaced it with
//!  the sender's address. The relay may drop, delay, duplicate and reorder datagrams, and the
//!  protocol has to cope with all of that.
//!
//! ## Frame format
//!
//! ```ascii
//! 0: frame kind (u8) - SYN = 0, SYN_ACK = 1, ACK = 2, DATA = 3
//! 1: sequence bit (u8) - 0 or 1, anything else is malformed
//! 2: peer IPv4 address (4 bytes, network byte order)
//! 6: peer port (u16, network byte order)
//! 8: payload - empty for everything but DATA
//! ```
//!
//! There is no checksum. The default maximum datagram size is 1024 bytes, leaving 1016 bytes
//!  of payload.
//!
//! ## Protocol
//!
//! Stop-and-wait with an alternating sequence bit: there is at most one unacknowledged frame
//!  per direction, and it is re-sent with identical content until it is acknowledged.
//!
//! * handshake: the client sends `SYN(0)` until it receives `SYN_ACK(0)`, and then sends
//!    `ACK(0)` without waiting for an acknowledgement
//! * request: the client sends `DATA(1)` until the server acknowledges it with `ACK(1)` or
//!    the response arrives. A request arriving before the handshake `ACK` completes the
//!    handshake implicitly.
//! * response: the server sends `DATA(1)` until the client acknowledges it with `ACK(1)`
//! * grace window: both sides keep acknowledging duplicate `DATA` frames for a while after the
//!    exchange completed, so that a peer whose `ACK` got lost is not left retransmitting
//!
//! The server invokes the application for at most one request per session, no matter how
//!  often the request is retransmitted. Sessions are demultiplexed by peer address in the
//!  [dispatcher::Dispatcher], with one worker task per active peer.

pub mod client_session;
pub mod config;
pub mod dispatcher;
pub mod frame;
pub mod request_handler;
pub mod send_socket;
pub mod seq;
pub mod server_session;
pub mod stop_and_wait;
