use primitive_types::U256;

use crate::compact::{compact_to_target, target_to_compact};
use crate::PowError;

/// Scales the target of `last_bits` by the observed over expected timespan.
/// The observed timespan is clamped to a factor of four either way and the
/// result never exceeds `pow_limit_bits`.
pub fn retarget(last_bits: u32, actual_timespan: u64, target_timespan: u64, pow_limit_bits: u32) -> Result<u32, PowError> {
    let limit = compact_to_target(pow_limit_bits)?;
    if target_timespan == 0 {
        return Ok(last_bits);
    }
    let actual = actual_timespan.clamp(target_timespan / 4, target_timespan.saturating_mul(4));

    let scaled = compact_to_target(last_bits)?.full_mul(U256::from(actual)) / U256::from(target_timespan);
    let new_target = U256::try_from(scaled).unwrap_or(limit).min(limit);
    Ok(target_to_compact(new_target))
}
