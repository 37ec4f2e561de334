use std::fmt::{Display, Formatter};
use crate::error::FrameError;

/// The alternating bit of stop-and-wait: it only distinguishes a frame from its immediate
///  successor, which is sufficient because at most one frame per direction is ever in flight.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SeqBit {
    Zero,
    One,
}

impl SeqBit {
    /// sequence bit used for the handshake (`SYN`, `SYN_ACK` and the handshake `ACK`)
    pub const HANDSHAKE: SeqBit = SeqBit::Zero;
    /// sequence bit used for request and response `DATA` and their acknowledgements
    pub const DATA: SeqBit = SeqBit::One;
}

impl From<SeqBit> for u8 {
    fn from(value: SeqBit) -> Self {
        match value {
            SeqBit::Zero => 0,
            SeqBit::One => 1,
        }
    }
}

impl TryFrom<u8> for SeqBit {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SeqBit::Zero),
            1 => Ok(SeqBit::One),
            n => Err(FrameError::InvalidSequence(n)),
        }
    }
}

impl Display for SeqBit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(0, Ok(SeqBit::Zero))]
    #[case::one(1, Ok(SeqBit::One))]
    #[case::two(2, Err(FrameError::InvalidSequence(2)))]
    #[case::max(255, Err(FrameError::InvalidSequence(255)))]
    fn test_try_from(#[case] raw: u8, #[case] expected: Result<SeqBit, FrameError>) {
        assert_eq!(SeqBit::try_from(raw), expected);
    }

    #[test]
    fn test_display() {
        assert_eq!(SeqBit::HANDSHAKE.to_string(), "0");
        assert_eq!(SeqBit::DATA.to_string(), "1");
    }
}
