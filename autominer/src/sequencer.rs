use motherlode_types::{Instruction, Pubkey, SquareMask};
use std::future::Future;
use thiserror::Error;

/// The signer's round bookkeeping, as stored in its miner account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MinerMarkers {
    /// Round the signer last deployed in.
    pub round_id: u64,
    /// Round the signer last checkpointed.
    pub checkpoint_id: u64,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("rejected: {reason}")]
    Rejected { reason: String },
    #[error("signer unavailable: {0}")]
    Unavailable(String),
}

/// Signing capability: builds, signs and submits one atomic transaction.
pub trait Submitter: Send + Sync + 'static {
    fn authority(&self) -> Pubkey;

    /// Current markers, or `None` if the signer has never deployed.
    fn markers(&self) -> impl Future<Output = Result<Option<MinerMarkers>, SubmitError>> + Send;

    /// Submit `instructions` together; returns the transaction signature.
    fn submit(
        &self,
        instructions: Vec<Instruction>,
    ) -> impl Future<Output = Result<String, SubmitError>> + Send;
}

/// Stand-in [Submitter] type for running without a signer.
#[derive(Clone, Copy, Debug)]
pub enum NoSigner {}

impl Submitter for NoSigner {
    fn authority(&self) -> Pubkey {
        match *self {}
    }

    async fn markers(&self) -> Result<Option<MinerMarkers>, SubmitError> {
        match *self {}
    }

    async fn submit(&self, _: Vec<Instruction>) -> Result<String, SubmitError> {
        match *self {}
    }
}

/// Instructions for one atomic submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sequence {
    pub instructions: Vec<Instruction>,
    /// Round being checkpointed, if a checkpoint was prepended.
    pub checkpoint: Option<u64>,
}

/// Order a deployment, prepending a checkpoint when the signer's bookkeeping is stale.
///
/// A checkpoint is needed when the signer deployed in a round it has not checkpointed
/// and that round is older than `active_round`. `checkpoint_fired` suppresses a second
/// checkpoint within the same round.
pub fn sequence(
    markers: Option<MinerMarkers>,
    active_round: u64,
    checkpoint_fired: bool,
    amount: u64,
    squares: SquareMask,
) -> Sequence {
    let checkpoint = markers
        .filter(|markers| {
            !checkpoint_fired
                && markers.round_id != markers.checkpoint_id
                && markers.round_id < active_round
        })
        .map(|markers| markers.round_id);

    let mut instructions = Vec::with_capacity(2);
    if let Some(round_id) = checkpoint {
        instructions.push(Instruction::Checkpoint { round_id });
    }
    instructions.push(Instruction::Deploy { amount, squares });
    Sequence {
        instructions,
        checkpoint,
    }
}

/// Whether a rejection is the expected race against the round closing.
pub fn is_expected_rejection(reason: &str) -> bool {
    const EXPECTED: [&str; 5] = [
        "too late",
        "round ended",
        "round has ended",
        "round closed",
        "nothing to claim",
    ];
    let reason = reason.to_ascii_lowercase();
    EXPECTED.iter().any(|expected| reason.contains(expected))
}

#[cfg(test)]
pub use mock::MockSubmitter;


#[cfg(test)]
mod tests {
    use super::*;

    fn mask() -> SquareMask {
        SquareMask::from_squares(&[7]).unwrap()
    }

    #[test]
    fn test_fresh_signer_only_deploys() {
        let sequence = sequence(None, 10, false, 1_000, mask());
        assert_eq!(sequence.checkpoint, None);
        assert_eq!(
            sequence.instructions,
            vec![Instruction::Deploy {
                amount: 1_000,
                squares: mask()
            }]
        );
    }

    #[test]
    fn test_stale_signer_checkpoints_first() {
        let markers = MinerMarkers {
            round_id: 8,
            checkpoint_id: 7,
        };
        let sequence = sequence(Some(markers), 10, false, 1_000, mask());
        assert_eq!(sequence.checkpoint, Some(8));
        assert_eq!(sequence.instructions.len(), 2);
        assert_eq!(sequence.instructions[0], Instruction::Checkpoint { round_id: 8 });
        assert!(matches!(sequence.instructions[1], Instruction::Deploy { .. }));
    }

    #[test]
    fn test_no_checkpoint_when_synced_or_current() {
        // Already checkpointed
        let synced = MinerMarkers {
            round_id: 8,
            checkpoint_id: 8,
        };
        assert_eq!(sequence(Some(synced), 10, false, 1, mask()).checkpoint, None);

        // Deployed in the active round itself
        let current = MinerMarkers {
            round_id: 10,
            checkpoint_id: 9,
        };
        assert_eq!(sequence(Some(current), 10, false, 1, mask()).checkpoint, None);

        // Checkpoint already sent this round
        let stale = MinerMarkers {
            round_id: 8,
            checkpoint_id: 7,
        };
        let sequence = sequence(Some(stale), 10, true, 1, mask());
        assert_eq!(sequence.checkpoint, None);
        assert_eq!(sequence.instructions.len(), 1);
    }

    #[test]
    fn test_expected_rejections() {
        assert!(is_expected_rejection("Error: Too late to deploy"));
        assert!(is_expected_rejection("custom program error: round ended"));
        assert!(is_expected_rejection("Nothing to claim"));
        assert!(!is_expected_rejection("insufficient funds"));
        assert!(!is_expected_rejection(""));
    }
}
