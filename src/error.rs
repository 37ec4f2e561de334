use thiserror::Error;

/// Reasons for rejecting a datagram as a frame. Inbound frames failing to decode are treated as
///  noise on the wire and dropped by whoever received them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("datagram of {0} bytes is shorter than the frame header")]
    TooShort(usize),
    #[error("unknown frame kind tag {0}")]
    UnknownKind(u8),
    #[error("invalid sequence bit {0}")]
    InvalidSequence(u8),
    #[error("payload of {len} bytes exceeds the maximum of {max} bytes per frame")]
    PayloadTooLarge { len: usize, max: usize },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0} does not exist")]
    NotFound(String),
    /// names that would escape the storage root or cannot name a file
    #[error("{0:?} is not a valid resource name")]
    InvalidName(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
