use crate::consts::SQUARES;
use bytes::BufMut;
use commonware_codec::{EncodeSize, Write};
use thiserror::Error;

/// Opcode of the state-sync instruction.
pub const CHECKPOINT: u8 = 2;

/// Opcode of the stake-commitment instruction.
pub const DEPLOY: u8 = 6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MaskError {
    #[error("square {0} is out of range (expected 1..={SQUARES})")]
    OutOfRange(usize),
    #[error("no squares selected")]
    Empty,
}

/// Bitmask over the board's squares: bit `i` selects square `i + 1`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SquareMask(u32);

impl SquareMask {
    pub fn from_squares(squares: &[usize]) -> Result<Self, MaskError> {
        if squares.is_empty() {
            return Err(MaskError::Empty);
        }
        let mut mask = 0u32;
        for &square in squares {
            if !(1..=SQUARES).contains(&square) {
                return Err(MaskError::OutOfRange(square));
            }
            mask |= 1u32 << (square - 1);
        }
        Ok(Self(mask))
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Selected squares in ascending order (1-based).
    pub fn squares(&self) -> impl Iterator<Item = usize> {
        let bits = self.0;
        (0..SQUARES)
            .filter(move |bit| bits & (1u32 << *bit) != 0)
            .map(|bit| bit + 1)
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Instructions the autominer submits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    /// Reconcile the signer's bookkeeping for `round_id` (selects accounts, not encoded).
    Checkpoint { round_id: u64 },
    /// Commit `amount` lamports to each selected square.
    Deploy { amount: u64, squares: SquareMask },
}

impl Instruction {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Checkpoint { .. } => CHECKPOINT,
            Self::Deploy { .. } => DEPLOY,
        }
    }
}

impl Write for Instruction {
    fn write(&self, writer: &mut impl BufMut) {
        writer.put_u8(self.opcode());
        if let Self::Deploy { amount, squares } = self {
            writer.put_u64_le(*amount);
            writer.put_u32_le(squares.bits());
        }
    }
}

impl EncodeSize for Instruction {
    fn encode_size(&self) -> usize {
        match self {
            Self::Checkpoint { .. } => 1,
            Self::Deploy { .. } => 1 + 8 + 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::Encode;

    #[test]
    fn test_mask_bits() {
        let mask = SquareMask::from_squares(&[1, 7, 25]).unwrap();
        assert_eq!(mask.bits(), 1 | (1 << 6) | (1 << 24));
        assert_eq!(mask.squares().collect::<Vec<_>>(), vec![1, 7, 25]);
        assert_eq!(mask.len(), 3);
    }

    #[test]
    fn test_mask_rejects_invalid_squares() {
        assert_eq!(SquareMask::from_squares(&[0]), Err(MaskError::OutOfRange(0)));
        assert_eq!(
            SquareMask::from_squares(&[3, 26]),
            Err(MaskError::OutOfRange(26))
        );
        assert_eq!(SquareMask::from_squares(&[]), Err(MaskError::Empty));
    }

    #[test]
    fn test_duplicate_squares_collapse() {
        let mask = SquareMask::from_squares(&[4, 4, 4]).unwrap();
        assert_eq!(mask.len(), 1);
    }

    #[test]
    fn test_deploy_payload_layout() {
        let squares = SquareMask::from_squares(&[2, 3]).unwrap();
        let encoded = Instruction::Deploy {
            amount: 10_000_000,
            squares,
        }
        .encode();
        assert_eq!(encoded.len(), 13);
        assert_eq!(encoded[0], DEPLOY);
        assert_eq!(&encoded[1..9], &10_000_000u64.to_le_bytes());
        assert_eq!(&encoded[9..13], &0b110u32.to_le_bytes());
    }

    #[test]
    fn test_checkpoint_payload_is_opcode_only() {
        let encoded = Instruction::Checkpoint { round_id: 99 }.encode();
        assert_eq!(encoded.as_ref(), &[CHECKPOINT]);
    }
}
