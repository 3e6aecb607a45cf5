//! Deterministic optimizers: SGD, SGD with momentum, Adam (spec §4.9, §9 L9
//! Optimizers).
//!
//! Default hyperparameters and the fixed-point Newton-Raphson square root
//! are taken verbatim from `original_source/src/training/optimizer.c` and
//! `include/optimizer.h`, since spec.md is silent on numeric defaults.

use tracing::debug;

use ctchain_core::dvm;
use ctchain_core::{CtError, CtResult, FaultFlags, Q16_16, Q8_24};

/// η = 0.01 in Q16.16.
pub const DEFAULT_LR: i32 = 655;
/// β = 0.9 in Q16.16, SGD+momentum's default momentum coefficient.
pub const DEFAULT_MOMENTUM: i32 = 58982;
/// Adam β₁ = 0.9 in Q16.16.
pub const ADAM_BETA1: i32 = 58982;
/// Adam β₂ ≈ 0.999 in Q16.16.
pub const ADAM_BETA2: i32 = 65471;
/// Adam ε, the smallest representable positive Q16.16 value.
pub const ADAM_EPSILON: i32 = 1;
/// Fixed iteration count for [`sqrt_q16_16`]; no data-dependent branching.
pub const SQRT_ITERATIONS: u32 = 8;

/// Fixed-point square root via Newton-Raphson on a pre-scaled value, fixed
/// at [`SQRT_ITERATIONS`] iterations for determinism (never data-dependent
/// early exit beyond convergence, matching `ct_opt_sqrt`).
pub fn sqrt_q16_16(x: Q16_16, _faults: &mut FaultFlags) -> Q16_16 {
    if x.raw() <= 0 {
        return Q16_16::ZERO;
    }

    let scaled = (x.raw() as u64) << 16;
    let leading = 63 - scaled.leading_zeros().min(63);
    let mut guess: u64 = 1u64 << ((leading + 1) / 2);

    for _ in 0..SQRT_ITERATIONS {
        if guess == 0 {
            break;
        }
        let div = scaled / guess;
        let new_guess = (guess + div) >> 1;
        if new_guess >= guess {
            break;
        }
        guess = new_guess;
    }

    Q16_16::from_raw(guess.min(i32::MAX as u64) as i32)
}

/// Converts a high-precision Q8.24 gradient to the Q16.16 parameter grid.
fn grad_to_param(grad: Q8_24, faults: &mut FaultFlags) -> Q16_16 {
    grad.narrow_to_q16_16(faults)
}

/// `θ = θ - η * (g + λ * θ)` (spec §4.9).
#[derive(Debug, Clone, Copy)]
pub struct SgdConfig {
    pub learning_rate: Q16_16,
    pub weight_decay: Q16_16,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self { learning_rate: Q16_16::from_raw(DEFAULT_LR), weight_decay: Q16_16::ZERO }
    }
}

#[derive(Debug, Clone)]
pub struct Sgd {
    config: SgdConfig,
    step: u64,
}

impl Sgd {
    pub fn new(config: SgdConfig) -> Self {
        Self { config, step: 0 }
    }

    pub fn step_count(&self) -> u64 {
        self.step
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }

    pub fn step(&mut self, params: &mut [i32], grads: &[i32], faults: &mut FaultFlags) -> CtResult<()> {
        if params.len() != grads.len() {
            return Err(CtError::Dimension);
        }
        for (theta, &g_hp) in params.iter_mut().zip(grads) {
            let mut g = grad_to_param(Q8_24::from_raw(g_hp), faults);
            if self.config.weight_decay.raw() != 0 {
                let decay = self.config.weight_decay.mul(Q16_16::from_raw(*theta), faults);
                g = g.add(decay, faults);
            }
            let update = self.config.learning_rate.mul(g, faults);
            *theta = dvm::sub(*theta, update.raw(), faults);
        }
        self.step += 1;
        debug!(step = self.step, num_params = params.len(), "sgd step");
        Ok(())
    }
}

/// `v = β * v + g`, `θ = θ - η * (v + λ * θ)` (spec §4.9).
#[derive(Debug, Clone, Copy)]
pub struct SgdMomentumConfig {
    pub learning_rate: Q16_16,
    pub momentum: Q16_16,
    pub weight_decay: Q16_16,
}

impl Default for SgdMomentumConfig {
    fn default() -> Self {
        Self {
            learning_rate: Q16_16::from_raw(DEFAULT_LR),
            momentum: Q16_16::from_raw(DEFAULT_MOMENTUM),
            weight_decay: Q16_16::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SgdMomentum {
    config: SgdMomentumConfig,
    velocity: Vec<i32>,
    step: u64,
}

impl SgdMomentum {
    pub fn new(config: SgdMomentumConfig, num_params: usize) -> CtResult<Self> {
        if num_params == 0 {
            return Err(CtError::Config);
        }
        Ok(Self { config, velocity: vec![0; num_params], step: 0 })
    }

    pub fn step_count(&self) -> u64 {
        self.step
    }

    pub fn reset(&mut self) {
        self.velocity.fill(0);
        self.step = 0;
    }

    pub fn step(&mut self, params: &mut [i32], grads: &[i32], faults: &mut FaultFlags) -> CtResult<()> {
        if params.len() != grads.len() || params.len() != self.velocity.len() {
            return Err(CtError::Dimension);
        }
        for i in 0..params.len() {
            let theta = Q16_16::from_raw(params[i]);
            let v = Q16_16::from_raw(self.velocity[i]);
            let g = grad_to_param(Q8_24::from_raw(grads[i]), faults);

            let v = self.config.momentum.mul(v, faults).add(g, faults);
            self.velocity[i] = v.raw();

            let mut effective_g = v;
            if self.config.weight_decay.raw() != 0 {
                let decay = self.config.weight_decay.mul(theta, faults);
                effective_g = v.add(decay, faults);
            }

            let update = self.config.learning_rate.mul(effective_g, faults);
            params[i] = theta.sub(update, faults).raw();
        }
        self.step += 1;
        debug!(step = self.step, num_params = params.len(), "sgd+momentum step");
        Ok(())
    }
}

/// `m = β₁m + (1-β₁)g`, `v = β₂v + (1-β₂)g²`, bias-corrected, `θ = θ - η *
/// m̂ / (√v̂ + ε)` (spec §4.9).
#[derive(Debug, Clone, Copy)]
pub struct AdamConfig {
    pub learning_rate: Q16_16,
    pub beta1: Q16_16,
    pub beta2: Q16_16,
    pub epsilon: Q16_16,
    pub weight_decay: Q16_16,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: Q16_16::from_raw(DEFAULT_LR),
            beta1: Q16_16::from_raw(ADAM_BETA1),
            beta2: Q16_16::from_raw(ADAM_BETA2),
            epsilon: Q16_16::from_raw(ADAM_EPSILON),
            weight_decay: Q16_16::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Adam {
    config: AdamConfig,
    m: Vec<i32>,
    v: Vec<i32>,
    beta1_power: Q16_16,
    beta2_power: Q16_16,
    step: u64,
}

impl Adam {
    pub fn new(config: AdamConfig, num_params: usize) -> CtResult<Self> {
        if num_params == 0 {
            return Err(CtError::Config);
        }
        Ok(Self {
            config,
            m: vec![0; num_params],
            v: vec![0; num_params],
            beta1_power: Q16_16::ONE,
            beta2_power: Q16_16::ONE,
            step: 0,
        })
    }

    pub fn step_count(&self) -> u64 {
        self.step
    }

    pub fn reset(&mut self) {
        self.m.fill(0);
        self.v.fill(0);
        self.beta1_power = Q16_16::ONE;
        self.beta2_power = Q16_16::ONE;
        self.step = 0;
    }

    pub fn step(&mut self, params: &mut [i32], grads: &[i32], faults: &mut FaultFlags) -> CtResult<()> {
        if params.len() != grads.len() || params.len() != self.m.len() {
            return Err(CtError::Dimension);
        }

        self.beta1_power = self.beta1_power.mul(self.config.beta1, faults);
        self.beta2_power = self.beta2_power.mul(self.config.beta2, faults);
        let one_minus_beta1_t = Q16_16::ONE.sub(self.beta1_power, faults);
        let one_minus_beta2_t = Q16_16::ONE.sub(self.beta2_power, faults);
        let one_minus_beta1 = Q16_16::ONE.sub(self.config.beta1, faults);
        let one_minus_beta2 = Q16_16::ONE.sub(self.config.beta2, faults);

        for i in 0..params.len() {
            let mut theta = Q16_16::from_raw(params[i]);
            let g = grad_to_param(Q8_24::from_raw(grads[i]), faults);

            let m_i = self.config.beta1.mul(Q16_16::from_raw(self.m[i]), faults).add(one_minus_beta1.mul(g, faults), faults);
            self.m[i] = m_i.raw();

            let g_sq = g.mul(g, faults);
            let v_i = self.config.beta2.mul(Q16_16::from_raw(self.v[i]), faults).add(one_minus_beta2.mul(g_sq, faults), faults);
            self.v[i] = v_i.raw();

            let m_hat = if one_minus_beta1_t.raw() > 0 { m_i.div(one_minus_beta1_t, faults) } else { m_i };
            let v_hat = if one_minus_beta2_t.raw() > 0 { v_i.div(one_minus_beta2_t, faults) } else { v_i };

            let sqrt_v = sqrt_q16_16(v_hat, faults);
            let denom = sqrt_v.add(self.config.epsilon, faults);
            let update = if denom.raw() > 0 {
                let ratio = m_hat.div(denom, faults);
                self.config.learning_rate.mul(ratio, faults)
            } else {
                Q16_16::ZERO
            };

            if self.config.weight_decay.raw() != 0 {
                let decay = self.config.learning_rate.mul(self.config.weight_decay, faults).mul(theta, faults);
                theta = theta.sub(decay, faults);
            }

            params[i] = theta.sub(update, faults).raw();
        }

        self.step += 1;
        debug!(step = self.step, num_params = params.len(), "adam step");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: i32 = 1 << 16;

    #[test]
    fn sqrt_of_perfect_square_is_exact() {
        let mut faults = FaultFlags::new();
        let four = Q16_16::from_raw(4 * ONE);
        let result = sqrt_q16_16(four, &mut faults);
        assert_eq!(result.raw(), 2 * ONE);
    }

    #[test]
    fn sqrt_of_nonpositive_is_zero() {
        let mut faults = FaultFlags::new();
        assert_eq!(sqrt_q16_16(Q16_16::ZERO, &mut faults).raw(), 0);
        assert_eq!(sqrt_q16_16(Q16_16::from_raw(-ONE), &mut faults).raw(), 0);
    }

    #[test]
    fn sqrt_of_one_is_one() {
        let mut faults = FaultFlags::new();
        let result = sqrt_q16_16(Q16_16::ONE, &mut faults);
        assert_eq!(result.raw(), ONE);
    }

    #[test]
    fn sgd_step_moves_params_opposite_gradient() {
        let mut sgd = Sgd::new(SgdConfig::default());
        let mut faults = FaultFlags::new();
        let mut params = [10 * ONE];
        // gradient of +1.0 in Q8.24
        let grads = [1i32 << 24];
        sgd.step(&mut params, &grads, &mut faults).unwrap();
        assert!(params[0] < 10 * ONE);
        assert_eq!(sgd.step_count(), 1);
    }

    #[test]
    fn sgd_momentum_accumulates_velocity_across_steps() {
        let mut opt = SgdMomentum::new(SgdMomentumConfig::default(), 1).unwrap();
        let mut faults = FaultFlags::new();
        let mut params = [0i32];
        let grads = [1i32 << 24];

        opt.step(&mut params, &grads, &mut faults).unwrap();
        let after_one = params[0];
        opt.step(&mut params, &grads, &mut faults).unwrap();
        let after_two = params[0];

        // momentum keeps pushing in the same direction, so step 2 moves
        // further than step 1 did.
        assert!((after_two - after_one).abs() > (after_one).abs());
    }

    #[test]
    fn adam_rejects_dimension_mismatch() {
        let mut opt = Adam::new(AdamConfig::default(), 2).unwrap();
        let mut faults = FaultFlags::new();
        let mut params = [0i32; 2];
        let grads = [0i32; 3];
        assert_eq!(opt.step(&mut params, &grads, &mut faults), Err(CtError::Dimension));
    }

    #[test]
    fn adam_step_count_advances_and_bias_correction_converges_to_one() {
        let mut opt = Adam::new(AdamConfig::default(), 1).unwrap();
        let mut faults = FaultFlags::new();
        let mut params = [ONE];
        let grads = [1i32 << 20];
        for _ in 0..50 {
            opt.step(&mut params, &grads, &mut faults).unwrap();
        }
        assert_eq!(opt.step_count(), 50);
        assert!(opt.beta1_power.raw() < 100);
    }

    #[test]
    fn zero_params_rejected_at_construction() {
        assert_eq!(SgdMomentum::new(SgdMomentumConfig::default(), 0).err(), Some(CtError::Config));
        assert_eq!(Adam::new(AdamConfig::default(), 0).err(), Some(CtError::Config));
    }
}
