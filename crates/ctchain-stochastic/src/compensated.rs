//! Neumaier compensated summation (spec §4.4).
//!
//! Plain fixed-point summation loses low-order bits as the running sum
//! grows; over a long enough batch that loss becomes schedule-dependent once
//! additions are reordered for parallelism. The Neumaier accumulator tracks
//! the rounding error alongside the sum so that merging partial sums in any
//! order produces the same final, compensated result (spec §8).

use ctchain_core::FaultFlags;

/// Batches larger than this set `domain` but are still processed (spec §4.4).
pub const MAX_BATCH_SIZE: u32 = 65536;

fn abs64_sat(x: i64, faults: &mut FaultFlags) -> i64 {
    if x == i64::MIN {
        faults.overflow = true;
        i64::MAX
    } else {
        x.abs()
    }
}

fn safe_add64(a: i64, b: i64, faults: &mut FaultFlags) -> i64 {
    if b > 0 && a > i64::MAX - b {
        faults.overflow = true;
        i64::MAX
    } else if b < 0 && a < i64::MIN - b {
        faults.underflow = true;
        i64::MIN
    } else {
        a + b
    }
}

/// A Neumaier (improved Kahan) compensated accumulator over 64-bit values.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompAccum {
    sum: i64,
    err: i64,
}

impl CompAccum {
    pub const fn new() -> Self {
        Self { sum: 0, err: 0 }
    }

    pub const fn with_value(initial: i64) -> Self {
        Self { sum: initial, err: 0 }
    }

    /// Raw running sum before error compensation.
    pub const fn sum(&self) -> i64 {
        self.sum
    }

    /// Accumulated compensation term.
    pub const fn err(&self) -> i64 {
        self.err
    }

    /// Add one value, updating the compensation term (spec §4.4).
    pub fn add(&mut self, value: i64, faults: &mut FaultFlags) {
        let t = safe_add64(self.sum, value, faults);

        let e = if abs64_sat(self.sum, faults) >= abs64_sat(value, faults) {
            (self.sum - t) + value
        } else {
            (value - t) + self.sum
        };

        self.sum = t;
        self.err = safe_add64(self.err, e, faults);
    }

    /// Fold another accumulator's sum and error into this one, as used when
    /// merging reduction-tree children (spec §4.5).
    pub fn merge(&mut self, other: &CompAccum, faults: &mut FaultFlags) {
        self.add(other.sum, faults);
        self.err = safe_add64(self.err, other.err, faults);
    }

    /// Final compensated value: `sum + err` (spec §4.4).
    pub fn finalize(&self, faults: &mut FaultFlags) -> i64 {
        safe_add64(self.sum, self.err, faults)
    }
}

/// Sum a slice of 64-bit values with compensation; batches over
/// [`MAX_BATCH_SIZE`] still run to completion but set `domain` (spec §4.4).
pub fn sum_array(values: &[i64], faults: &mut FaultFlags) -> i64 {
    if values.is_empty() {
        return 0;
    }
    if values.len() as u64 > MAX_BATCH_SIZE as u64 {
        faults.domain = true;
    }

    let mut accum = CompAccum::new();
    for &value in values {
        accum.add(value, faults);
    }
    accum.finalize(faults)
}

/// Sum a slice of 32-bit fixed-point values, widening each to 64 bits before
/// accumulation (spec §4.4).
pub fn sum_array_32(values: &[i32], faults: &mut FaultFlags) -> i64 {
    if values.is_empty() {
        return 0;
    }
    if values.len() as u64 > MAX_BATCH_SIZE as u64 {
        faults.domain = true;
    }

    let mut accum = CompAccum::new();
    for &value in values {
        accum.add(value as i64, faults);
    }
    accum.finalize(faults)
}

/// Mean of a slice of 64-bit values via [`sum_array`]; an empty slice sets
/// `div_zero` and returns 0 (spec §4.4).
pub fn mean_array(values: &[i64], faults: &mut FaultFlags) -> i64 {
    if values.is_empty() {
        faults.div_zero = true;
        return 0;
    }
    let sum = sum_array(values, faults);
    sum / values.len() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compensated_sum_recovers_precision_naive_sum_loses() {
        let mut faults = FaultFlags::new();
        let mut values = vec![1_000_000_000_000i64];
        values.extend(std::iter::repeat(1i64).take(1000));
        let compensated = sum_array(&values, &mut faults);
        assert_eq!(compensated, 1_000_000_001_000);
        assert!(!faults.has_fault());
    }

    #[test]
    fn merge_is_associative_with_sequential_add() {
        let mut faults = FaultFlags::new();
        let values = [7i64, -3, 42, 1000, -999, 5];

        let mut sequential = CompAccum::new();
        for &v in &values {
            sequential.add(v, &mut faults);
        }

        let mut left = CompAccum::new();
        for &v in &values[..3] {
            left.add(v, &mut faults);
        }
        let mut right = CompAccum::new();
        for &v in &values[3..] {
            right.add(v, &mut faults);
        }
        left.merge(&right, &mut faults);

        assert_eq!(sequential.finalize(&mut faults), left.finalize(&mut faults));
    }

    #[test]
    fn oversized_batch_sets_domain_but_still_sums() {
        let mut faults = FaultFlags::new();
        let values = vec![1i64; (MAX_BATCH_SIZE + 1) as usize];
        let result = sum_array(&values, &mut faults);
        assert_eq!(result, (MAX_BATCH_SIZE + 1) as i64);
        assert!(faults.domain);
    }

    #[test]
    fn mean_of_empty_sets_div_zero() {
        let mut faults = FaultFlags::new();
        assert_eq!(mean_array(&[], &mut faults), 0);
        assert!(faults.div_zero);
    }
}
