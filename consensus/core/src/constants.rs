/// Current block version
pub const BLOCK_VERSION: u16 = 1;

/// Current transaction version. Version 2 enables relative (sequence) locks.
pub const TX_VERSION: u16 = 1;
pub const TX_VERSION_RELATIVE_LOCKS: u16 = 2;

/// Number of base units in one coin
pub const COIN: u64 = 100_000_000;

/// Maximum money supply in base units
pub const MAX_MONEY: u64 = 21_000_000 * COIN;

/// Lock times below this value are block heights, above it unix timestamps
pub const LOCKTIME_THRESHOLD: u64 = 500_000_000;

/// Input sequence marking the input as final
pub const SEQUENCE_FINAL: u64 = u64::MAX;

/// When set, the input sequence carries no relative lock
pub const SEQUENCE_LOCK_DISABLE_FLAG: u64 = 1 << 31;

/// Low bits of the sequence holding the relative height lock
pub const SEQUENCE_LOCK_MASK: u64 = 0x0000_ffff;

/// Number of ancestors used for median-time-past
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Marker prefix of federation voting data carried in a PoA coinbase
pub const VOTING_DATA_MAGIC: [u8; 4] = *b"VOTE";
