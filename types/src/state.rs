use crate::consts::{
    BOARD, BOARD_DISCRIMINATOR, DISCRIMINATOR_LEN, ROUND, ROUND_DISCRIMINATOR, SQUARES,
};
use bytes::{Buf, BufMut};
use commonware_codec::{Error, FixedSize, Read, Write};
use solana_sdk::pubkey::Pubkey;
use std::fmt;

/// Program accounts are little-endian, the codec's integer impls are not.
fn read_u64(reader: &mut impl Buf) -> Result<u64, Error> {
    if reader.remaining() < 8 {
        return Err(Error::EndOfBuffer);
    }
    Ok(reader.get_u64_le())
}

fn read_array<const N: usize>(reader: &mut impl Buf) -> Result<[u8; N], Error> {
    if reader.remaining() < N {
        return Err(Error::EndOfBuffer);
    }
    let mut bytes = [0u8; N];
    reader.copy_to_slice(&mut bytes);
    Ok(bytes)
}

fn read_counters(reader: &mut impl Buf) -> Result<[u64; SQUARES], Error> {
    let mut counters = [0u64; SQUARES];
    for counter in counters.iter_mut() {
        *counter = read_u64(reader)?;
    }
    Ok(counters)
}

fn skip_discriminator(reader: &mut impl Buf) -> Result<(), Error> {
    if reader.remaining() < DISCRIMINATOR_LEN {
        return Err(Error::EndOfBuffer);
    }
    reader.advance(DISCRIMINATOR_LEN);
    Ok(())
}

fn write_discriminator(tag: u8, writer: &mut impl BufMut) {
    let mut discriminator = [0u8; DISCRIMINATOR_LEN];
    discriminator[0] = tag;
    writer.put_slice(&discriminator);
}

/// Shared game state: the round currently accepting stakes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Board {
    /// Round currently accepting stakes.
    pub round_id: u64,
    /// Slot at which the active round started.
    pub start_slot: u64,
    /// Slot at which the active round closes (`u64::MAX` until the first stake lands).
    pub end_slot: u64,
}

impl Board {
    /// Address of the board account.
    pub fn address(program_id: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[BOARD], program_id).0
    }

    /// Whether the active round has started its countdown.
    pub fn has_started(&self) -> bool {
        self.end_slot != u64::MAX
    }
}

impl Write for Board {
    fn write(&self, writer: &mut impl BufMut) {
        write_discriminator(BOARD_DISCRIMINATOR, writer);
        writer.put_u64_le(self.round_id);
        writer.put_u64_le(self.start_slot);
        writer.put_u64_le(self.end_slot);
    }
}

impl Read for Board {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        skip_discriminator(reader)?;
        Ok(Self {
            round_id: read_u64(reader)?,
            start_slot: read_u64(reader)?,
            end_slot: read_u64(reader)?,
        })
    }
}

impl FixedSize for Board {
    const SIZE: usize = DISCRIMINATOR_LEN + 3 * u64::SIZE;
}

/// Verifiable randomness revealed when a round closes.
///
/// An all-zero block means the outcome has not been determined yet.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Entropy(pub [u8; 32]);

impl Entropy {
    /// Whether the block carries an outcome.
    pub fn is_populated(&self) -> bool {
        self.0.iter().any(|byte| *byte != 0)
    }

    /// XOR of the block's four little-endian words.
    pub fn rng(&self) -> Option<u64> {
        if !self.is_populated() {
            return None;
        }
        let rng = self
            .0
            .chunks_exact(8)
            .map(|word| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(word);
                u64::from_le_bytes(bytes)
            })
            .fold(0u64, |acc, word| acc ^ word);
        Some(rng)
    }

    /// Winning square (1-based).
    pub fn winning_square(&self) -> Option<usize> {
        self.rng()
            .map(|rng| (rng % SQUARES as u64) as usize + 1)
    }
}

impl fmt::Debug for Entropy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Per-round detail: stakes and participants for each square plus the outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Round {
    pub id: u64,
    /// Lamports committed to each square.
    pub deployed: [u64; SQUARES],
    pub entropy: Entropy,
    /// Participants on each square.
    pub count: [u64; SQUARES],
    pub expires_at: u64,
    /// Reward pool, in grams.
    pub motherlode: u64,
    pub rent_payer: Pubkey,
    pub top_miner: Pubkey,
    pub top_miner_reward: u64,
    pub total_deployed: u64,
    pub total_vaulted: u64,
    pub total_winnings: u64,
}

impl Round {
    /// Address of the round account for `id`.
    pub fn address(program_id: &Pubkey, id: u64) -> Pubkey {
        Pubkey::find_program_address(&[ROUND, &id.to_le_bytes()], program_id).0
    }

    /// An empty round with no stakes and no outcome.
    pub fn empty(id: u64) -> Self {
        Self {
            id,
            deployed: [0; SQUARES],
            entropy: Entropy::default(),
            count: [0; SQUARES],
            expires_at: 0,
            motherlode: 0,
            rent_payer: Pubkey::default(),
            top_miner: Pubkey::default(),
            top_miner_reward: 0,
            total_deployed: 0,
            total_vaulted: 0,
            total_winnings: 0,
        }
    }

    /// Sum of the per-square stakes, in lamports.
    pub fn stake_sum(&self) -> u64 {
        self.deployed
            .iter()
            .fold(0u64, |acc, deployed| acc.saturating_add(*deployed))
    }
}

impl Write for Round {
    fn write(&self, writer: &mut impl BufMut) {
        write_discriminator(ROUND_DISCRIMINATOR, writer);
        writer.put_u64_le(self.id);
        for deployed in self.deployed {
            writer.put_u64_le(deployed);
        }
        writer.put_slice(&self.entropy.0);
        for count in self.count {
            writer.put_u64_le(count);
        }
        writer.put_u64_le(self.expires_at);
        writer.put_u64_le(self.motherlode);
        writer.put_slice(self.rent_payer.as_ref());
        writer.put_slice(self.top_miner.as_ref());
        writer.put_u64_le(self.top_miner_reward);
        writer.put_u64_le(self.total_deployed);
        writer.put_u64_le(self.total_vaulted);
        writer.put_u64_le(self.total_winnings);
    }
}

impl Read for Round {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        skip_discriminator(reader)?;
        Ok(Self {
            id: read_u64(reader)?,
            deployed: read_counters(reader)?,
            entropy: Entropy(read_array(reader)?),
            count: read_counters(reader)?,
            expires_at: read_u64(reader)?,
            motherlode: read_u64(reader)?,
            rent_payer: Pubkey::new_from_array(read_array(reader)?),
            top_miner: Pubkey::new_from_array(read_array(reader)?),
            top_miner_reward: read_u64(reader)?,
            total_deployed: read_u64(reader)?,
            total_vaulted: read_u64(reader)?,
            total_winnings: read_u64(reader)?,
        })
    }
}

impl FixedSize for Round {
    const SIZE: usize = DISCRIMINATOR_LEN
        + u64::SIZE
        + SQUARES * u64::SIZE
        + 32
        + SQUARES * u64::SIZE
        + 2 * u64::SIZE
        + 2 * 32
        + 4 * u64::SIZE;
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{Encode, ReadExt};
    use proptest::prelude::*;

    fn sample_round() -> Round {
        let mut round = Round::empty(42);
        for (i, deployed) in round.deployed.iter_mut().enumerate() {
            *deployed = (i as u64 + 1) * 1_000;
        }
        for (i, count) in round.count.iter_mut().enumerate() {
            *count = i as u64 % 3;
        }
        round.entropy = Entropy([7u8; 32]);
        round.expires_at = 9_000;
        round.motherlode = 123_456;
        round.top_miner = Pubkey::new_from_array([9u8; 32]);
        round.total_deployed = round.stake_sum();
        round.total_vaulted = 11;
        round.total_winnings = 12;
        round
    }

    #[test]
    fn test_round_size_matches_layout() {
        assert_eq!(Round::SIZE, 560);
        assert_eq!(Board::SIZE, 32);
    }

    #[test]
    fn test_round_decodes_fields_in_order() {
        let round = sample_round();
        let encoded = round.encode();
        assert_eq!(encoded.len(), Round::SIZE);
        assert_eq!(encoded[0], ROUND_DISCRIMINATOR);

        // Id sits right after the discriminator, little-endian
        assert_eq!(&encoded[8..16], &42u64.to_le_bytes());

        let decoded = Round::read(&mut encoded.as_ref()).unwrap();
        assert_eq!(decoded, round);
        assert_eq!(decoded.deployed[24], 25_000);
        assert_eq!(decoded.motherlode, 123_456);
    }

    #[test]
    fn test_board_decode_skips_discriminator() {
        let mut raw = vec![0xAAu8; DISCRIMINATOR_LEN];
        raw.extend_from_slice(&7u64.to_le_bytes());
        raw.extend_from_slice(&100u64.to_le_bytes());
        raw.extend_from_slice(&250u64.to_le_bytes());
        let board = Board::read(&mut raw.as_slice()).unwrap();
        assert_eq!(
            board,
            Board {
                round_id: 7,
                start_slot: 100,
                end_slot: 250
            }
        );
        assert!(board.has_started());
    }

    #[test]
    fn test_trailing_bytes_are_tolerated() {
        let board = Board {
            round_id: 3,
            start_slot: 1,
            end_slot: u64::MAX,
        };
        let mut raw = board.encode().to_vec();
        raw.extend_from_slice(&[1, 2, 3, 4]);
        let decoded = Board::read(&mut raw.as_slice()).unwrap();
        assert_eq!(decoded, board);
        assert!(!decoded.has_started());
    }

    #[test]
    fn test_short_buffers_fail() {
        assert!(matches!(
            Board::read(&mut [0u8; 4].as_slice()),
            Err(Error::EndOfBuffer)
        ));
        let encoded = sample_round().encode();
        let truncated = &encoded[..Round::SIZE - 1];
        assert!(matches!(
            Round::read(&mut &truncated[..]),
            Err(Error::EndOfBuffer)
        ));
        assert!(Round::read(&mut [0u8; 0].as_slice()).is_err());
    }

    #[test]
    fn test_entropy_unpopulated() {
        let entropy = Entropy::default();
        assert!(!entropy.is_populated());
        assert_eq!(entropy.rng(), None);
        assert_eq!(entropy.winning_square(), None);
    }

    #[test]
    fn test_entropy_xor_of_words() {
        let mut block = [0u8; 32];
        block[..8].copy_from_slice(&5u64.to_le_bytes());
        block[8..16].copy_from_slice(&3u64.to_le_bytes());
        block[16..24].copy_from_slice(&40u64.to_le_bytes());
        block[24..].copy_from_slice(&0u64.to_le_bytes());
        let entropy = Entropy(block);
        assert_eq!(entropy.rng(), Some(5 ^ 3 ^ 40));
        // 46 % 25 = 21 -> square 22
        assert_eq!(entropy.winning_square(), Some(22));
    }

    #[test]
    fn test_entropy_single_nonzero_byte_is_populated() {
        let mut block = [0u8; 32];
        block[31] = 1;
        let entropy = Entropy(block);
        assert!(entropy.is_populated());
        let square = entropy.winning_square().unwrap();
        assert!((1..=SQUARES).contains(&square));
    }

    #[test]
    fn test_entropy_is_deterministic() {
        let entropy = Entropy([0x5Au8; 32]);
        assert_eq!(entropy.winning_square(), entropy.winning_square());
        // Identical words cancel out in pairs
        assert_eq!(entropy.rng(), Some(0));
        assert_eq!(entropy.winning_square(), Some(1));
    }

    #[test]
    fn test_round_addresses_differ_by_id() {
        let program = Pubkey::new_unique();
        assert_ne!(Round::address(&program, 1), Round::address(&program, 2));
        assert_eq!(Round::address(&program, 1), Round::address(&program, 1));
        assert_ne!(Board::address(&program), Round::address(&program, 0));
    }

    proptest! {
        #[test]
        fn test_populated_entropy_picks_a_square(block in prop::array::uniform32(any::<u8>())) {
            let entropy = Entropy(block);
            if entropy.is_populated() {
                let square = entropy.winning_square().unwrap();
                prop_assert!((1..=SQUARES).contains(&square));
                prop_assert_eq!(Some(square), Entropy(block).winning_square());
            } else {
                prop_assert_eq!(entropy.winning_square(), None);
            }
        }
    }
}
