use std::fmt::{Debug, Formatter};
use std::net::{Ipv4Addr, SocketAddrV4};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::error::FrameError;
use crate::transport::seq::SeqBit;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum FrameKind {
    Syn = 0,
    SynAck = 1,
    Ack = 2,
    Data = 3,
}

/// A frame is the unit exchanged with the relay: one frame per datagram.
///
/// `peer` is the logical endpoint on the other side of the relay. When sending, it is the
///  destination; on receipt, the relay has replaced it with the original sender's address.
#[derive(Clone, Eq, PartialEq)]
pub struct Frame {
    pub kind: FrameKind,
    pub seq: SeqBit,
    pub peer: SocketAddrV4,
    pub payload: Bytes,
}

impl Debug for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}(seq={}, peer={}, {} bytes)", self.kind, self.seq, self.peer, self.payload.len())
    }
}

impl Frame {
    /// kind (1) + sequence (1) + IPv4 address (4) + port (2)
    pub const HEADER_LEN: usize = 8;

    pub fn control(kind: FrameKind, seq: SeqBit, peer: SocketAddrV4) -> Frame {
        Frame {
            kind,
            seq,
            peer,
            payload: Bytes::new(),
        }
    }

    pub fn data(seq: SeqBit, peer: SocketAddrV4, payload: Bytes) -> Frame {
        Frame {
            kind: FrameKind::Data,
            seq,
            peer,
            payload,
        }
    }

    pub fn with_peer(&self, peer: SocketAddrV4) -> Frame {
        Frame {
            peer,
            ..self.clone()
        }
    }

    pub fn serialized_len(&self) -> usize {
        Self::HEADER_LEN + self.payload.len()
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind.into());
        buf.put_u8(self.seq.into());
        buf.put_u32(self.peer.ip().to_bits());
        buf.put_u16(self.peer.port());
        buf.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        self.ser(&mut buf);
        buf.freeze()
    }

    /// The payload has no length prefix: it is everything after the header, i.e. the datagram
    ///  delimits it.
    pub fn deser(datagram: &[u8]) -> Result<Frame, FrameError> {
        if datagram.len() < Self::HEADER_LEN {
            return Err(FrameError::TooShort(datagram.len()));
        }

        let mut buf = datagram;
        let raw_kind = buf.get_u8();
        let kind = FrameKind::try_from(raw_kind)
            .map_err(|_| FrameError::UnknownKind(raw_kind))?;
        let seq = SeqBit::try_from(buf.get_u8())?;
        let ip = Ipv4Addr::from_bits(buf.get_u32());
        let port = buf.get_u16();

        Ok(Frame {
            kind,
            seq,
            peer: SocketAddrV4::new(ip, port),
            payload: Bytes::copy_from_slice(buf),
        })
    }
}
