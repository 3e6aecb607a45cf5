//! Mean squared error loss (spec §9; grounded on
//! `original_source/src/training/backward.c`'s `ct_loss_mse_forward`/
//! `ct_loss_mse_backward`).

use ctchain_core::dvm;
use ctchain_core::{CtError, CtResult, FaultFlags, Q16_16};
use ctchain_stochastic::CompAccum;

/// `L = (1/N) Σ (ŷ - y)²`, in Q16.16.
pub fn mse_forward(output: &[i32], target: &[i32], faults: &mut FaultFlags) -> CtResult<Q16_16> {
    if output.len() != target.len() {
        return Err(CtError::Dimension);
    }
    let n = output.len();

    let mut acc = CompAccum::new();
    for (&o, &t) in output.iter().zip(target) {
        let diff = dvm::sub(o, t, faults);
        acc.add((diff as i64) * (diff as i64), faults);
    }
    let mut sum = acc.finalize(faults);
    if n > 0 {
        sum /= n as i64;
    }
    Ok(Q16_16::from_raw(dvm::clamp32(sum >> 16, faults)))
}

/// `∂L/∂ŷ = (2/N)(ŷ - y)`, written into `grad_output` as Q8.24 values.
pub fn mse_backward(output: &[i32], target: &[i32], grad_output: &mut [i32], faults: &mut FaultFlags) -> CtResult<()> {
    if output.len() != target.len() || output.len() != grad_output.len() {
        return Err(CtError::Dimension);
    }
    let n = output.len();

    let two_over_n: i64 = if n > 0 { (2i64 << 24) / n as i64 } else { 0 };

    for i in 0..n {
        let diff = dvm::sub(output[i], target[i], faults);
        let diff_hp = (diff as i64) << 8; // Q16.16 -> Q8.24
        let diff_hp = dvm::clamp32(diff_hp, faults);
        grad_output[i] = dvm::round_shift_rne((diff_hp as i64) * two_over_n, 24, faults);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: i32 = 1 << 16;

    #[test]
    fn mse_of_identical_vectors_is_zero() {
        let mut faults = FaultFlags::new();
        let v = [ONE, 2 * ONE, -ONE];
        assert_eq!(mse_forward(&v, &v, &mut faults).unwrap(), Q16_16::ZERO);
        assert!(!faults.has_fault());
    }

    #[test]
    fn mse_matches_hand_computed_value() {
        let mut faults = FaultFlags::new();
        let output = [2 * ONE, 0];
        let target = [0, 0];
        // diffs: [2, 0], squared: [4, 0], mean: 2.0
        let loss = mse_forward(&output, &target, &mut faults).unwrap();
        assert_eq!(loss.raw(), 2 * ONE);
    }

    #[test]
    fn mse_backward_gradient_points_toward_target() {
        let mut faults = FaultFlags::new();
        let output = [2 * ONE];
        let target = [0];
        let mut grad = [0i32];
        mse_backward(&output, &target, &mut grad, &mut faults).unwrap();
        assert!(grad[0] > 0, "gradient should be positive when output exceeds target");
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let mut faults = FaultFlags::new();
        assert_eq!(mse_forward(&[0, 0], &[0], &mut faults).err(), Some(CtError::Dimension));
    }
}
