//! Account layouts, instruction payloads and protocol constants shared by the
//! motherlode client and autominer.

pub mod consts;
pub mod instruction;
pub mod state;

pub use instruction::{Instruction, MaskError, SquareMask};
pub use solana_sdk::pubkey::Pubkey;
pub use state::{Board, Entropy, Round};

/// Convert lamports to SOL.
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / consts::LAMPORTS_PER_SOL as f64
}

/// Convert SOL to lamports, rounding down. Non-finite or negative amounts map to zero.
pub fn sol_to_lamports(sol: f64) -> u64 {
    if !sol.is_finite() || sol <= 0.0 {
        return 0;
    }
    (sol * consts::LAMPORTS_PER_SOL as f64) as u64
}

/// Convert the reward asset's smallest unit to whole tokens.
pub fn grams_to_ore(grams: u64) -> f64 {
    grams as f64 / consts::ONE_ORE as f64
}
