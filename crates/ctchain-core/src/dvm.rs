//! Deterministic virtual machine primitives (spec §4.2).
//!
//! Every primitive computes in at least one size wider than its inputs and
//! then saturates. These are free functions over raw `i32`/`i64` carriers;
//! [`crate::fixed`] wraps them with the Q16.16/Q8.24 newtypes.

use crate::fault::FaultFlags;

/// Maximum shift accepted by [`round_shift_rne`] / [`div_q`] (spec §4.2).
pub const MAX_SHIFT: u32 = 62;

/// Saturate a 64-bit value to the `i32` range, setting `overflow`/`underflow`
/// on clamp (spec §4.2).
pub fn clamp32(x: i64, faults: &mut FaultFlags) -> i32 {
    if x > i32::MAX as i64 {
        faults.overflow = true;
        i32::MAX
    } else if x < i32::MIN as i64 {
        faults.underflow = true;
        i32::MIN
    } else {
        x as i32
    }
}

/// Saturating absolute value of a 64-bit value (spec §4.2).
///
/// `i64::MIN` has no positive representation in `i64`; that case saturates
/// to `i64::MAX` and sets `overflow`.
pub fn abs64_sat(x: i64, faults: &mut FaultFlags) -> i64 {
    if x == i64::MIN {
        faults.overflow = true;
        i64::MAX
    } else {
        x.abs()
    }
}

/// Arithmetic right shift of `x` by `shift` bits with round-to-nearest-even,
/// then [`clamp32`] (spec §4.2).
///
/// `shift == 0` is equivalent to `clamp32`. `shift > 62` sets `domain` and
/// returns 0.
pub fn round_shift_rne(x: i64, shift: u32, faults: &mut FaultFlags) -> i32 {
    if shift > MAX_SHIFT {
        faults.domain = true;
        return 0;
    }
    if shift == 0 {
        return clamp32(x, faults);
    }

    let mask = (1i64 << shift) - 1;
    let halfway = 1i64 << (shift - 1);
    let fraction = x & mask;
    let quotient = x >> shift;

    let result = match fraction.cmp(&halfway) {
        core::cmp::Ordering::Less => quotient,
        core::cmp::Ordering::Greater => quotient + 1,
        core::cmp::Ordering::Equal => quotient + (quotient & 1),
    };

    clamp32(result, faults)
}

/// Q16.16 saturating addition: 64-bit add, then [`clamp32`] (spec §4.2).
pub fn add(a: i32, b: i32, faults: &mut FaultFlags) -> i32 {
    clamp32(a as i64 + b as i64, faults)
}

/// Q16.16 saturating subtraction: 64-bit sub, then [`clamp32`] (spec §4.2).
pub fn sub(a: i32, b: i32, faults: &mut FaultFlags) -> i32 {
    clamp32(a as i64 - b as i64, faults)
}

/// Q16.16 saturating multiplication: 64-bit product, round-shift by 16 bits
/// (spec §4.2).
pub fn mul(a: i32, b: i32, faults: &mut FaultFlags) -> i32 {
    round_shift_rne(a as i64 * b as i64, 16, faults)
}

/// Plain 32-bit integer division truncated toward zero; `b == 0` sets
/// `div_zero` and returns 0 (spec §4.2).
pub fn div_int32(a: i32, b: i32, faults: &mut FaultFlags) -> i32 {
    if b == 0 {
        faults.div_zero = true;
        return 0;
    }
    a / b
}

/// Fixed-point division with an explicit fractional-bit count: `b == 0` sets
/// `div_zero`; `frac > 62` sets `domain`; otherwise `(a << frac) / b`,
/// saturated (spec §4.2).
pub fn div_q(a: i32, b: i32, frac: u32, faults: &mut FaultFlags) -> i32 {
    if b == 0 {
        faults.div_zero = true;
        return 0;
    }
    if frac > MAX_SHIFT {
        faults.domain = true;
        return 0;
    }
    let wide = (a as i64) << frac;
    clamp32(wide / b as i64, faults)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S1 — DVM addition saturation (spec §8 S1).
    #[test]
    fn add_saturates_to_i32_max() {
        let mut faults = FaultFlags::new();
        let result = add(i32::MAX, 65536, &mut faults);
        assert_eq!(result, i32::MAX);
        assert!(faults.overflow);
    }

    /// S2 — RNE ties-to-even table (spec §8 S2, §4.2).
    #[test]
    fn round_shift_rne_ties_to_even_table() {
        let cases: [(i64, i32); 8] = [
            (0x18000, 2),
            (0x28000, 2),
            (0x38000, 4),
            (0x48000, 4),
            (0x58000, 6),
            (-0x18000, -2),
            (-0x28000, -2),
            (-0x38000, -4),
        ];
        for (x, expected) in cases {
            let mut faults = FaultFlags::new();
            let result = round_shift_rne(x, 16, &mut faults);
            assert_eq!(result, expected, "x = {x:#x}");
            assert!(!faults.has_fault());
        }
    }

    /// Invariant 2 — RNE ties go to even, for an arbitrary odd multiplier.
    #[test]
    fn round_shift_rne_invariant_ties_to_even() {
        for m in -8i64..8 {
            let x = (2 * m + 1) * (1i64 << 15);
            let mut faults = FaultFlags::new();
            let result = round_shift_rne(x, 16, &mut faults) as i64;
            let (lo, hi) = (m, m + 1);
            let expected = if lo % 2 == 0 { lo } else { hi };
            assert_eq!(result, expected, "m = {m}");
        }
    }

    #[test]
    fn shift_zero_is_clamp32() {
        let mut faults = FaultFlags::new();
        let mut faults2 = FaultFlags::new();
        let x = 123_456_789_012i64;
        assert_eq!(round_shift_rne(x, 0, &mut faults), clamp32(x, &mut faults2));
    }

    #[test]
    fn shift_over_62_sets_domain() {
        let mut faults = FaultFlags::new();
        assert_eq!(round_shift_rne(1, 63, &mut faults), 0);
        assert!(faults.domain);
    }

    #[test]
    fn div_by_zero_sets_div_zero() {
        let mut faults = FaultFlags::new();
        assert_eq!(div_int32(10, 0, &mut faults), 0);
        assert!(faults.div_zero);

        let mut faults = FaultFlags::new();
        assert_eq!(div_q(10, 0, 16, &mut faults), 0);
        assert!(faults.div_zero);
    }

    #[test]
    fn abs64_sat_of_i64_min_saturates() {
        let mut faults = FaultFlags::new();
        assert_eq!(abs64_sat(i64::MIN, &mut faults), i64::MAX);
        assert!(faults.overflow);

        let mut faults = FaultFlags::new();
        assert_eq!(abs64_sat(-5, &mut faults), 5);
        assert!(!faults.has_fault());
    }

    #[test]
    fn mul_matches_grid_value() {
        // 1.5 * 2.0 == 3.0 on the Q16.16 grid.
        let mut faults = FaultFlags::new();
        let one_half = (1.5 * 65536.0) as i32;
        let two = (2.0 * 65536.0) as i32;
        let result = mul(one_half, two, &mut faults);
        assert_eq!(result, (3.0 * 65536.0) as i32);
        assert!(!faults.has_fault());
    }

    proptest::proptest! {
        #[test]
        fn add_never_panics_and_is_well_ordered(a: i32, b: i32) {
            let mut faults = FaultFlags::new();
            let result = add(a, b, &mut faults);
            let exact = a as i64 + b as i64;
            if exact > i32::MAX as i64 {
                proptest::prop_assert_eq!(result, i32::MAX);
                proptest::prop_assert!(faults.overflow);
            } else if exact < i32::MIN as i64 {
                proptest::prop_assert_eq!(result, i32::MIN);
                proptest::prop_assert!(faults.underflow);
            } else {
                proptest::prop_assert_eq!(result as i64, exact);
                proptest::prop_assert!(!faults.has_fault());
            }
        }
    }
}
