//! Compact ("bits") encoding of 256-bit targets: one size byte followed by a
//! 23-bit mantissa and a sign bit.

use primitive_types::U256;

use crate::PowError;

const SIGN_BIT: u32 = 0x0080_0000;
const MANTISSA_MASK: u32 = 0x007f_ffff;

pub fn compact_to_target(bits: u32) -> Result<U256, PowError> {
    let size = (bits >> 24) as usize;
    let word = bits & MANTISSA_MASK;

    if word != 0 && bits & SIGN_BIT != 0 {
        return Err(PowError::NegativeTarget(bits));
    }
    if word != 0 && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32)) {
        return Err(PowError::TargetOverflow(bits));
    }

    Ok(if size <= 3 { U256::from(word >> (8 * (3 - size))) } else { U256::from(word) << (8 * (size - 3)) })
}

pub fn target_to_compact(target: U256) -> u32 {
    let mut size = (target.bits() + 7) / 8;
    let mut compact = if size <= 3 { (target.low_u64() << (8 * (3 - size))) as u32 } else { (target >> (8 * (size - 3))).low_u32() };
    // Keep the mantissa positive
    if compact & SIGN_BIT != 0 {
        compact >>= 8;
        size += 1;
    }
    compact | ((size as u32) << 24)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_encodings() {
        let target = compact_to_target(0x1d00_ffff).unwrap();
        assert_eq!(target, U256::from(0xffffu64) << 208);
        assert_eq!(target_to_compact(target), 0x1d00_ffff);

        let regtest = compact_to_target(0x207f_ffff).unwrap();
        assert_eq!(target_to_compact(regtest), 0x207f_ffff);
        assert_eq!(compact_to_target(0x0312_3456).unwrap(), U256::from(0x12_3456u64));
        assert_eq!(target_to_compact(U256::from(0x80u64)), 0x0200_8000);
    }

    #[test]
    fn rejects_negative_and_overflowing_bits() {
        assert_eq!(compact_to_target(0x0180_0001), Err(PowError::NegativeTarget(0x0180_0001)));
        assert_eq!(compact_to_target(0xff12_3456), Err(PowError::TargetOverflow(0xff12_3456)));
        assert_eq!(compact_to_target(0).unwrap(), U256::zero());
    }
}
