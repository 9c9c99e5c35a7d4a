/// Number of squares on the board.
pub const SQUARES: usize = 25;

/// Length of the account discriminator that prefixes every program account.
pub const DISCRIMINATOR_LEN: usize = 8;

/// Discriminator tag of the board account.
pub const BOARD_DISCRIMINATOR: u8 = 105;

/// Discriminator tag of the round account.
pub const ROUND_DISCRIMINATOR: u8 = 109;

/// Lamports in one SOL.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Decimal precision of the reward token.
pub const TOKEN_DECIMALS: u8 = 11;

/// One reward token, denominated in indivisible units ("grams").
pub const ONE_ORE: u64 = 10u64.pow(TOKEN_DECIMALS as u32);

/// Target duration of one ledger slot.
pub const SLOT_DURATION_MS: u64 = 400;

/// Program that owns the board and round accounts on mainnet.
pub const DEFAULT_PROGRAM_ID: &str = "oreV3EG1i9BEgiAJ8b177Z2S2rMarzak4NMv1kULvWv";

/// Seed of the board account PDA.
pub const BOARD: &[u8] = b"board";

/// Seed of the round account PDA.
pub const ROUND: &[u8] = b"round";

/// Mint of the reward token (price feed asset).
pub const ORE_MINT: &str = "oreoU2P8bN6jkk3jbaiVxYnG1dCXcYxwhwyK9jSybcp";

/// Mint of wrapped SOL (price feed asset).
pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";
