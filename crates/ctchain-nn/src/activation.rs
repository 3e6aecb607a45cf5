//! Activation functions: ReLU exactly, sigmoid/tanh via a shared lookup
//! table with linear interpolation (spec §4.9, §9 Sigmoid LUT Open
//! Question).
//!
//! The table is built once, at [`Activation::new`] time, using `f64` — the
//! one place in this crate floating point is allowed, since it never runs on
//! the forward/backward hot path. Runtime lookup is table index + one
//! multiply-shift, matching `original_source/src/training/forward.c`'s
//! `ct_sigmoid`/`ct_tanh_act` exactly.

use ctchain_core::{FaultFlags, Q16_16, Q8_24};

/// Number of entries in a sigmoid/tanh LUT (256 intervals + 1).
pub const LUT_SIZE: usize = 257;

fn float_to_q16_16(f: f64) -> i32 {
    (f * ONE_Q16_F + f.signum() * 0.5) as i32
}

const ONE_Q16_F: f64 = (1i64 << 16) as f64;

/// Precomputed table over `[-8, +8]` for a sigmoid- or tanh-shaped curve,
/// sampled at 257 evenly spaced points and linearly interpolated at lookup
/// time.
#[derive(Debug, Clone)]
pub struct ActivationLut {
    table: [i32; LUT_SIZE],
    domain_min: i32,
    domain_max: i32,
}

impl ActivationLut {
    fn build(f: impl Fn(f64) -> f64) -> Self {
        let mut table = [0i32; LUT_SIZE];
        for (i, slot) in table.iter_mut().enumerate() {
            let x = -8.0 + (16.0 * i as f64) / 256.0;
            *slot = float_to_q16_16(f(x));
        }
        Self { table, domain_min: float_to_q16_16(-8.0), domain_max: float_to_q16_16(8.0) }
    }

    /// Build the sigmoid LUT: `1 / (1 + e^-x)` sampled over `[-8, +8]`.
    pub fn sigmoid() -> Self {
        Self::build(|x| 1.0 / (1.0 + (-x).exp()))
    }

    /// Build the tanh LUT over `[-8, +8]`.
    pub fn tanh() -> Self {
        Self::build(f64::tanh)
    }

    /// Saturating linear-interpolation lookup, mirroring
    /// `original_source`'s `ct_sigmoid`/`ct_tanh_act` index math exactly.
    fn lookup(&self, x: i32, saturate_low: i32, saturate_high: i32) -> i32 {
        if x <= self.domain_min {
            return saturate_low;
        }
        if x >= self.domain_max {
            return saturate_high;
        }

        let x_shifted = x as i64 - self.domain_min as i64;
        let scaled = x_shifted * 16;
        let mut index = (scaled >> 16) as usize;
        if index >= LUT_SIZE - 1 {
            index = LUT_SIZE - 2;
        }
        let frac = scaled & ((1i64 << 16) - 1);

        let y0 = self.table[index] as i64;
        let y1 = self.table[index + 1] as i64;
        let interp = ((y1 - y0) * frac) >> 16;
        (y0 + interp) as i32
    }
}

/// The activation kinds the original forward pass supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    Identity,
    Relu,
    Sigmoid,
    Tanh,
}

/// A stateless activation: wraps a kind plus (for sigmoid/tanh) the LUT it
/// looks up against.
#[derive(Debug, Clone)]
pub struct Activation {
    kind: ActivationKind,
    lut: Option<ActivationLut>,
}

impl Activation {
    pub fn new(kind: ActivationKind) -> Self {
        let lut = match kind {
            ActivationKind::Sigmoid => Some(ActivationLut::sigmoid()),
            ActivationKind::Tanh => Some(ActivationLut::tanh()),
            ActivationKind::Identity | ActivationKind::Relu => None,
        };
        Self { kind, lut }
    }

    pub fn kind(&self) -> ActivationKind {
        self.kind
    }

    /// Apply the activation to a single Q16.16 value.
    pub fn apply(&self, x: Q16_16) -> Q16_16 {
        match self.kind {
            ActivationKind::Identity => x,
            ActivationKind::Relu => Q16_16::from_raw(x.raw().max(0)),
            ActivationKind::Sigmoid => {
                let lut = self.lut.as_ref().expect("sigmoid activation always carries a LUT");
                Q16_16::from_raw(lut.lookup(x.raw(), 0, Q16_16::ONE.raw()))
            }
            ActivationKind::Tanh => {
                let lut = self.lut.as_ref().expect("tanh activation always carries a LUT");
                Q16_16::from_raw(lut.lookup(x.raw(), -Q16_16::ONE.raw(), Q16_16::ONE.raw()))
            }
        }
    }

    /// Apply element-wise over a tensor buffer.
    pub fn forward(&self, input: &[i32], output: &mut [i32]) {
        for (o, &i) in output.iter_mut().zip(input) {
            *o = self.apply(Q16_16::from_raw(i)).raw();
        }
    }

    /// Backward pass. `cache` holds pre-activation values for ReLU, or
    /// post-activation values for sigmoid/tanh, exactly as
    /// `original_source`'s `ct_activation_layer_backward` dispatches.
    pub fn backward(&self, grad_output: Q8_24, cache: Q16_16, faults: &mut FaultFlags) -> Q8_24 {
        match self.kind {
            ActivationKind::Identity => grad_output,
            ActivationKind::Relu => {
                if cache.raw() > 0 {
                    grad_output
                } else {
                    Q8_24::ZERO
                }
            }
            ActivationKind::Sigmoid => {
                let one_minus = Q16_16::ONE.sub(cache, faults);
                let deriv = cache.mul(one_minus, faults);
                grad_output.mul(deriv.widen_to_q8_24(faults), faults)
            }
            ActivationKind::Tanh => {
                let squared = cache.mul(cache, faults);
                let deriv = Q16_16::ONE.sub(squared, faults);
                grad_output.mul(deriv.widen_to_q8_24(faults), faults)
            }
        }
    }
}
