//! Proof-of-work math: compact targets, chain work, header checks and retargeting.

pub mod compact;
pub mod retarget;

use consensus_core::header::Header;
use consensus_core::ChainWork;
use primitive_types::U256;
use thiserror::Error;

pub use compact::{compact_to_target, target_to_compact};
pub use retarget::retarget;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PowError {
    #[error("compact target {0:#010x} is negative")]
    NegativeTarget(u32),

    #[error("compact target {0:#010x} overflows 256 bits")]
    TargetOverflow(u32),

    #[error("target of {0:#010x} is zero or above the network limit")]
    TargetOutOfRange(u32),

    #[error("header hash does not meet its target")]
    InsufficientWork,
}

/// Work represented by a header with `bits`: `2^256 / (target + 1)`.
/// Undecodable or zero targets carry no work.
pub fn calc_work(bits: u32) -> ChainWork {
    match compact_to_target(bits) {
        Ok(target) if !target.is_zero() => (!target / (target + 1)) + 1,
        _ => U256::zero(),
    }
}

/// Pre-computed target of a header, used to check candidate nonces
pub struct State {
    pub(crate) target: U256,
    header: Header,
}

impl State {
    pub fn new(header: &Header, pow_limit_bits: u32) -> Result<Self, PowError> {
        let target = compact_to_target(header.bits)?;
        if target.is_zero() || target > compact_to_target(pow_limit_bits)? {
            return Err(PowError::TargetOutOfRange(header.bits));
        }
        Ok(Self { target, header: header.clone() })
    }

    /// Header hash read as a little-endian 256-bit number
    #[inline]
    pub fn calculate_pow(&self, nonce: u64) -> U256 {
        let mut header = self.header.clone();
        header.nonce = nonce;
        U256::from_little_endian(header.hash().as_bytes())
    }

    #[inline]
    #[must_use]
    pub fn check_pow(&self, nonce: u64) -> (bool, U256) {
        let pow = self.calculate_pow(nonce);
        (pow <= self.target, pow)
    }
}

/// Checks that `header` hashes below its own (valid, in-range) target
pub fn check_pow(header: &Header, pow_limit_bits: u32) -> Result<(), PowError> {
    let state = State::new(header, pow_limit_bits)?;
    match state.check_pow(header.nonce) {
        (true, _) => Ok(()),
        (false, _) => Err(PowError::InsufficientWork),
    }
}

/// Searches nonces from the header's current one; returns whether a solution was found
pub fn solve(header: &mut Header, pow_limit_bits: u32, max_tries: u64) -> Result<bool, PowError> {
    let state = State::new(header, pow_limit_bits)?;
    let start = header.nonce;
    for nonce in start..start.saturating_add(max_tries) {
        if state.check_pow(nonce).0 {
            header.nonce = nonce;
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use consensus_core::ZERO_HASH;

    const REGTEST_BITS: u32 = 0x207f_ffff;

    #[test]
    fn work_grows_as_target_shrinks() {
        assert!(calc_work(0x1d00_ffff) > calc_work(REGTEST_BITS));
        assert_eq!(calc_work(REGTEST_BITS), U256::from(2u64));
        assert_eq!(calc_work(0), U256::zero());
        assert_eq!(calc_work(0x0180_0001), U256::zero());
    }

    #[test]
    fn solved_header_passes_check() {
        let mut header = Header::new(ZERO_HASH, ZERO_HASH, 1_700_000_000, REGTEST_BITS, 0, 1);
        assert!(solve(&mut header, REGTEST_BITS, 1_000).unwrap());
        assert_eq!(check_pow(&header, REGTEST_BITS), Ok(()));
    }

    #[test]
    fn target_above_limit_is_rejected() {
        let header = Header::new(ZERO_HASH, ZERO_HASH, 1, REGTEST_BITS, 0, 1);
        assert_eq!(check_pow(&header, 0x1d00_ffff), Err(PowError::TargetOutOfRange(REGTEST_BITS)));
    }

    #[test]
    fn hard_target_is_not_met_by_chance() {
        let mut header = Header::new(ZERO_HASH, ZERO_HASH, 1, 0x1d00_ffff, 0, 1);
        assert!(!solve(&mut header, 0x1d00_ffff, 50).unwrap());
        assert_eq!(check_pow(&header, 0x1d00_ffff), Err(PowError::InsufficientWork));
    }
}
