//! Gradient post-processing: clipping, scaling, norm computation, and
//! vanishing-gradient health tracking over a flat Q8.24 buffer (grounded on
//! `original_source/src/training/backward.c`'s `ct_grad_clip`/`ct_grad_scale`/
//! `ct_grad_norm`/`ct_grad_health_*`).

use ctchain_core::dvm;
use ctchain_core::{FaultFlags, Q16_16, Q8_24};
use ctchain_stochastic::CompAccum;

/// Share of gradients that must be exactly zero before [`GradHealth`] calls
/// the run vanishing.
const FLOOR_THRESHOLD_PERCENT: u64 = 5;

/// Newton-Raphson iterations for [`norm`]'s 64-bit integer square root.
/// Wider input range than `crate::optim::sqrt_q16_16`'s 8 iterations, since
/// a sum of squares can occupy most of 64 bits before converging.
const NORM_SQRT_ITERS: u32 = 32;

/// Default symmetric gradient clip bound: ±100 in Q8.24.
pub const DEFAULT_CLIP: i32 = 100 << 24;

/// Clamps every element of `grad` into `[min_val, max_val]` in place,
/// returning the number of elements that were clipped.
pub fn clip(grad: &mut [i32], min_val: i32, max_val: i32) -> u32 {
    let mut clipped = 0;
    for v in grad.iter_mut() {
        if *v < min_val {
            *v = min_val;
            clipped += 1;
        } else if *v > max_val {
            *v = max_val;
            clipped += 1;
        }
    }
    clipped
}

/// Scales every element of `grad` by `scale` (a Q8.24 multiplier) in place.
pub fn scale(grad: &mut [i32], scale: Q8_24, faults: &mut FaultFlags) {
    for v in grad.iter_mut() {
        *v = Q8_24::from_raw(*v).mul(scale, faults).raw();
    }
}

/// `‖grad‖ = sqrt(Σ gᵢ²)`, computed with a compensated sum of squares then an
/// integer Newton-Raphson sqrt taken directly on the raw Q16.48 sum.
///
/// If the Q8.24 values sum-of-squares to `V` represented as raw integer
/// `sum_sq = V · 2^48`, then `sqrt(sum_sq) = sqrt(V) · 2^24`: the integer
/// square root of the raw accumulator is already the norm in Q8.24, with no
/// format conversion needed.
pub fn norm(grad: &[i32], faults: &mut FaultFlags) -> Q8_24 {
    let mut acc = CompAccum::new();
    for &g in grad {
        acc.add((g as i64) * (g as i64), faults);
    }
    let sum_sq = acc.finalize(faults);
    if sum_sq <= 0 {
        return Q8_24::ZERO;
    }

    let x = sum_sq as u64;
    let mut guess = (x >> 1).max(1);
    for _ in 0..NORM_SQRT_ITERS {
        if guess == 0 {
            break;
        }
        let div = x / guess;
        let new_guess = (guess + div) >> 1;
        if new_guess >= guess {
            break;
        }
        guess = new_guess;
    }

    Q8_24::from_raw(dvm::clamp32(guess as i64, faults))
}

/// Tracks how many gradients land exactly on zero across a run, to flag the
/// advisory `grad_floor` bit when too many updates have vanished.
#[derive(Debug, Clone, Copy)]
pub struct GradHealth {
    zero_grad_count: u64,
    total_grad_count: u64,
    min_nonzero_grad: i32,
    max_grad: i32,
}

impl Default for GradHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl GradHealth {
    pub fn new() -> Self {
        Self { zero_grad_count: 0, total_grad_count: 0, min_nonzero_grad: i32::MAX, max_grad: 0 }
    }

    /// Folds one gradient buffer's statistics into the running totals.
    pub fn update(&mut self, grad: &[i32]) {
        for &val in grad {
            let abs_val = val.unsigned_abs() as i32;
            self.total_grad_count += 1;
            if val == 0 {
                self.zero_grad_count += 1;
            } else if abs_val < self.min_nonzero_grad {
                self.min_nonzero_grad = abs_val;
            }
            if abs_val > self.max_grad {
                self.max_grad = abs_val;
            }
        }
    }

    /// True once more than [`FLOOR_THRESHOLD_PERCENT`] of all gradients seen
    /// so far have been exactly zero.
    pub fn is_vanishing(&self) -> bool {
        if self.total_grad_count == 0 {
            return false;
        }
        let threshold = (self.total_grad_count * FLOOR_THRESHOLD_PERCENT) / 100;
        self.zero_grad_count > threshold
    }

    /// Fraction of gradients seen so far that were exactly zero, as Q16.16.
    pub fn zero_ratio(&self) -> Q16_16 {
        if self.total_grad_count == 0 {
            return Q16_16::ZERO;
        }
        const FIXED_ONE: u64 = 1 << 16;
        let ratio = (self.zero_grad_count * FIXED_ONE) / self.total_grad_count;
        Q16_16::from_raw(ratio.min(FIXED_ONE) as i32)
    }

    pub fn min_nonzero_grad(&self) -> Option<i32> {
        (self.min_nonzero_grad != i32::MAX).then_some(self.min_nonzero_grad)
    }

    pub fn max_grad(&self) -> i32 {
        self.max_grad
    }

    /// Sets the sticky, advisory `grad_floor` bit if [`is_vanishing`](Self::is_vanishing).
    pub fn check(&self, faults: &mut FaultFlags) {
        if self.is_vanishing() {
            faults.grad_floor = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_reports_count_and_bounds_values() {
        let mut grad = [-200i32, 0, 200];
        let count = clip(&mut grad, -100, 100);
        assert_eq!(count, 2);
        assert_eq!(grad, [-100, 0, 100]);
    }

    #[test]
    fn clip_within_bounds_is_a_no_op() {
        let mut grad = [-5i32, 0, 5];
        let count = clip(&mut grad, -100, 100);
        assert_eq!(count, 0);
        assert_eq!(grad, [-5, 0, 5]);
    }

    #[test]
    fn scale_by_zero_zeroes_every_element() {
        let mut faults = FaultFlags::new();
        let mut grad = [1 << 24, -(1 << 20)];
        scale(&mut grad, Q8_24::ZERO, &mut faults);
        assert_eq!(grad, [0, 0]);
    }

    #[test]
    fn norm_of_zero_gradient_is_zero() {
        let mut faults = FaultFlags::new();
        let grad = [0i32, 0, 0];
        assert_eq!(norm(&grad, &mut faults), Q8_24::ZERO);
    }

    #[test]
    fn grad_health_flags_vanishing_past_five_percent_zero() {
        let mut health = GradHealth::new();
        // 100 gradients, 6 exactly zero: over the 5% threshold.
        let mut buf = vec![1i32 << 24; 94];
        buf.extend(std::iter::repeat(0).take(6));
        health.update(&buf);

        assert!(health.is_vanishing());
        let mut faults = FaultFlags::new();
        health.check(&mut faults);
        assert!(faults.grad_floor);
        assert!(!faults.has_fault());
    }

    #[test]
    fn grad_health_does_not_flag_below_threshold() {
        let mut health = GradHealth::new();
        let mut buf = vec![1i32 << 24; 99];
        buf.push(0);
        health.update(&buf);

        assert!(!health.is_vanishing());
        let mut faults = FaultFlags::new();
        health.check(&mut faults);
        assert!(!faults.grad_floor);
    }

    #[test]
    fn grad_health_tracks_min_and_max() {
        let mut health = GradHealth::new();
        health.update(&[0, -20, 5, -3]);
        assert_eq!(health.min_nonzero_grad(), Some(3));
        assert_eq!(health.max_grad(), 20);
    }
}
