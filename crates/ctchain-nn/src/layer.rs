//! Linear (dense) and Conv2d layers (spec §4.9, §9 L8 Layers).
//!
//! Both hold caller-provided parameter buffers and never allocate on
//! `forward`/`backward`. Dot products route through
//! [`ctchain_stochastic::CompAccum`] for the same order-independent
//! summation the reduction tree and loss functions use, exactly as
//! `original_source/src/training/forward.c`'s `ct_matvec_mul` does.

use ctchain_core::dvm;
use ctchain_core::{CtError, CtResult, FaultFlags, Q16_16, Q8_24};
use ctchain_stochastic::CompAccum;

fn dot_q16_16(a: &[i32], b: &[i32], faults: &mut FaultFlags) -> i32 {
    let mut acc = CompAccum::new();
    for (&x, &y) in a.iter().zip(b) {
        acc.add((x as i64) * (y as i64), faults);
    }
    let sum = acc.finalize(faults);
    dvm::round_shift_rne(sum, 16, faults)
}

/// `y = Wx + b`, `W: [output_size, input_size]` row-major, `x: [input_size]`,
/// `b`/`y: [output_size]`.
#[derive(Debug, Clone)]
pub struct Linear {
    weights: Vec<i32>,
    bias: Vec<i32>,
    input_size: usize,
    output_size: usize,
}

impl Linear {
    pub fn new(input_size: usize, output_size: usize) -> CtResult<Self> {
        if input_size == 0 || output_size == 0 {
            return Err(CtError::Config);
        }
        Ok(Self {
            weights: vec![0; input_size * output_size],
            bias: vec![0; output_size],
            input_size,
            output_size,
        })
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn weights(&self) -> &[i32] {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut [i32] {
        &mut self.weights
    }

    pub fn bias(&self) -> &[i32] {
        &self.bias
    }

    pub fn bias_mut(&mut self) -> &mut [i32] {
        &mut self.bias
    }

    pub fn forward(&self, input: &[i32], output: &mut [i32], faults: &mut FaultFlags) -> CtResult<()> {
        if input.len() != self.input_size {
            return Err(CtError::Dimension);
        }
        if output.len() != self.output_size {
            return Err(CtError::Dimension);
        }

        for (i, row) in self.weights.chunks_exact(self.input_size).enumerate() {
            let dot = dot_q16_16(row, input, faults);
            output[i] = dvm::add(dot, self.bias[i], faults);
        }
        Ok(())
    }
}

/// Cached per-step state `backward` needs: the input that produced the last
/// forward pass, so weight gradients can be recovered without storing a
/// second copy inside `Linear` itself.
#[derive(Debug, Clone)]
pub struct LinearGrad {
    pub grad_weights: Vec<i32>,
    pub grad_bias: Vec<i32>,
    input_size: usize,
    output_size: usize,
}

fn grad_mul_fixed(grad: Q8_24, value: Q16_16, faults: &mut FaultFlags) -> Q8_24 {
    Q8_24::from_raw(dvm::round_shift_rne((grad.raw() as i64) * (value.raw() as i64), 16, faults))
}

impl LinearGrad {
    pub fn new(input_size: usize, output_size: usize) -> Self {
        Self { grad_weights: vec![0; input_size * output_size], grad_bias: vec![0; output_size], input_size, output_size }
    }

    /// `grad_input = W^T @ grad_output`, `grad_weights[j,i] = grad_output[j]
    /// * input[i]`, `grad_bias[j] = grad_output[j]` (spec §4.9; matches
    /// `original_source`'s `ct_linear_backward` for a single sample).
    pub fn backward(
        &mut self,
        layer: &Linear,
        input: &[i32],
        grad_output: &[i32],
        grad_input: Option<&mut [i32]>,
        faults: &mut FaultFlags,
    ) -> CtResult<()> {
        if input.len() != self.input_size || grad_output.len() != self.output_size {
            return Err(CtError::Dimension);
        }

        self.grad_weights.fill(0);
        self.grad_bias.fill(0);

        if let Some(grad_input) = grad_input {
            if grad_input.len() != self.input_size {
                return Err(CtError::Dimension);
            }
            for i in 0..self.input_size {
                let mut acc = CompAccum::new();
                for j in 0..self.output_size {
                    let w = layer.weights[j * self.input_size + i];
                    let go = grad_output[j];
                    acc.add((go as i64) * (w as i64), faults);
                }
                let sum = acc.finalize(faults) >> 16;
                grad_input[i] = dvm::clamp32(sum, faults);
            }
        }

        for j in 0..self.output_size {
            let go = Q8_24::from_raw(grad_output[j]);
            self.grad_bias[j] = go.raw();
            for i in 0..self.input_size {
                let inp = Q16_16::from_raw(input[i]);
                self.grad_weights[j * self.input_size + i] = grad_mul_fixed(go, inp, faults).raw();
            }
        }

        Ok(())
    }
}

/// 2D convolution (`y[n,c,h,w] = Σ x[n,ci,h+kh,w+kw] * W[c,ci,kh,kw] + b[c]`),
/// channel-major (`CHW`) layout, zero-padding, no dilation — the single
/// convolution kind `original_source/src/layers/conv2d.c` implements.
#[derive(Debug, Clone)]
pub struct Conv2d {
    weights: Vec<i32>,
    bias: Vec<i32>,
    in_channels: usize,
    out_channels: usize,
    kernel_h: usize,
    kernel_w: usize,
    stride_h: usize,
    stride_w: usize,
    padding_h: usize,
    padding_w: usize,
}

impl Conv2d {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_h: usize,
        kernel_w: usize,
        stride_h: usize,
        stride_w: usize,
        padding_h: usize,
        padding_w: usize,
    ) -> CtResult<Self> {
        if kernel_h == 0 || kernel_w == 0 || stride_h == 0 || stride_w == 0 {
            return Err(CtError::Config);
        }
        let weight_size = out_channels * in_channels * kernel_h * kernel_w;
        Ok(Self {
            weights: vec![0; weight_size],
            bias: vec![0; out_channels],
            in_channels,
            out_channels,
            kernel_h,
            kernel_w,
            stride_h,
            stride_w,
            padding_h,
            padding_w,
        })
    }

    /// Default 3x3, stride-1, same-padding configuration.
    pub fn with_default_config(in_channels: usize, out_channels: usize) -> CtResult<Self> {
        Self::new(in_channels, out_channels, 3, 3, 1, 1, 1, 1)
    }

    pub fn weights_mut(&mut self) -> &mut [i32] {
        &mut self.weights
    }

    pub fn bias_mut(&mut self) -> &mut [i32] {
        &mut self.bias
    }

    fn output_dim(&self, input_dim: usize, kernel: usize, stride: usize, padding: usize) -> usize {
        (input_dim + 2 * padding - kernel) / stride + 1
    }

    pub fn output_size(&self, in_h: usize, in_w: usize) -> (usize, usize) {
        (
            self.output_dim(in_h, self.kernel_h, self.stride_h, self.padding_h),
            self.output_dim(in_w, self.kernel_w, self.stride_w, self.padding_w),
        )
    }

    fn weight_idx(&self, oc: usize, ic: usize, kh: usize, kw: usize) -> usize {
        ((oc * self.in_channels + ic) * self.kernel_h + kh) * self.kernel_w + kw
    }

    /// `input`: `[in_channels, in_h, in_w]`, `output`:
    /// `[out_channels, out_h, out_w]`, both flat `CHW`.
    pub fn forward(
        &self,
        input: &[i32],
        output: &mut [i32],
        in_h: usize,
        in_w: usize,
        faults: &mut FaultFlags,
    ) -> CtResult<()> {
        if input.len() != self.in_channels * in_h * in_w {
            return Err(CtError::Dimension);
        }
        let (out_h, out_w) = self.output_size(in_h, in_w);
        if output.len() != self.out_channels * out_h * out_w {
            return Err(CtError::Dimension);
        }

        for oc in 0..self.out_channels {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let mut acc = CompAccum::new();
                    for ic in 0..self.in_channels {
                        for kh in 0..self.kernel_h {
                            for kw in 0..self.kernel_w {
                                let ih = (oh * self.stride_h + kh) as isize - self.padding_h as isize;
                                let iw = (ow * self.stride_w + kw) as isize - self.padding_w as isize;
                                if ih >= 0 && (ih as usize) < in_h && iw >= 0 && (iw as usize) < in_w {
                                    let in_idx = (ic * in_h + ih as usize) * in_w + iw as usize;
                                    let w = self.weights[self.weight_idx(oc, ic, kh, kw)];
                                    acc.add((input[in_idx] as i64) * (w as i64), faults);
                                }
                            }
                        }
                    }
                    let sum = acc.finalize(faults);
                    let conv = dvm::round_shift_rne(sum, 16, faults);
                    let out_idx = (oc * out_h + oh) * out_w + ow;
                    output[out_idx] = dvm::add(conv, self.bias[oc], faults);
                }
            }
        }
        Ok(())
    }

    /// Accumulates weight/bias gradients and (optionally) the upstream
    /// input gradient for a single cached forward pass, mirroring
    /// `original_source`'s `ct_conv2d_backward`.
    #[allow(clippy::too_many_arguments)]
    pub fn backward(
        &self,
        input: &[i32],
        grad_output: &[i32],
        grad_weights: &mut [i32],
        grad_bias: &mut [i32],
        mut grad_input: Option<&mut [i32]>,
        in_h: usize,
        in_w: usize,
        faults: &mut FaultFlags,
    ) -> CtResult<()> {
        let (out_h, out_w) = self.output_size(in_h, in_w);
        if grad_output.len() != self.out_channels * out_h * out_w {
            return Err(CtError::Dimension);
        }
        if let Some(ref gi) = grad_input {
            if gi.len() != self.in_channels * in_h * in_w {
                return Err(CtError::Dimension);
            }
        }

        for oc in 0..self.out_channels {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let out_idx = (oc * out_h + oh) * out_w + ow;
                    let go = Q8_24::from_raw(grad_output[out_idx]);
                    grad_bias[oc] = dvm::add(grad_bias[oc], go.raw(), faults);

                    for ic in 0..self.in_channels {
                        for kh in 0..self.kernel_h {
                            for kw in 0..self.kernel_w {
                                let ih = (oh * self.stride_h + kh) as isize - self.padding_h as isize;
                                let iw = (ow * self.stride_w + kw) as isize - self.padding_w as isize;
                                if ih >= 0 && (ih as usize) < in_h && iw >= 0 && (iw as usize) < in_w {
                                    let in_idx = (ic * in_h + ih as usize) * in_w + iw as usize;
                                    let w_idx = self.weight_idx(oc, ic, kh, kw);

                                    let inp = Q16_16::from_raw(input[in_idx]);
                                    let gw = grad_mul_fixed(go, inp, faults);
                                    grad_weights[w_idx] = dvm::add(grad_weights[w_idx], gw.raw(), faults);

                                    if let Some(ref mut gi) = grad_input {
                                        let w = Q16_16::from_raw(self.weights[w_idx]);
                                        let contrib = grad_mul_fixed(go, w, faults);
                                        gi[in_idx] = dvm::add(gi[in_idx], contrib.raw(), faults);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: i32 = 1 << 16;

    #[test]
    fn linear_forward_matches_hand_computed_dot_plus_bias() {
        let mut layer = Linear::new(2, 1).unwrap();
        layer.weights_mut().copy_from_slice(&[2 * ONE, 3 * ONE]);
        layer.bias_mut()[0] = ONE;

        let mut faults = FaultFlags::new();
        let mut out = [0i32; 1];
        layer.forward(&[ONE, ONE], &mut out, &mut faults).unwrap();

        // 2*1 + 3*1 + 1 = 6
        assert_eq!(out[0], 6 * ONE);
        assert!(!faults.has_fault());
    }

    #[test]
    fn linear_forward_rejects_mismatched_input_size() {
        let layer = Linear::new(2, 1).unwrap();
        let mut faults = FaultFlags::new();
        let mut out = [0i32; 1];
        assert_eq!(layer.forward(&[ONE], &mut out, &mut faults), Err(CtError::Dimension));
    }

    #[test]
    fn linear_backward_bias_grad_equals_grad_output() {
        let layer = Linear::new(2, 2).unwrap();
        let mut grad = LinearGrad::new(2, 2);
        let mut faults = FaultFlags::new();

        let grad_output = [100_000i32, -50_000];
        grad.backward(&layer, &[ONE, 2 * ONE], &grad_output, None, &mut faults).unwrap();

        assert_eq!(grad.grad_bias, grad_output);
    }

    #[test]
    fn zero_weights_conv_forward_is_bias_broadcast() {
        let mut conv = Conv2d::with_default_config(1, 1).unwrap();
        conv.bias_mut()[0] = 5 * ONE;
        let input = vec![ONE; 4 * 4];
        let mut faults = FaultFlags::new();
        let (out_h, out_w) = conv.output_size(4, 4);
        let mut output = vec![0i32; out_h * out_w];
        conv.forward(&input, &mut output, 4, 4, &mut faults).unwrap();

        assert!(output.iter().all(|&v| v == 5 * ONE));
        assert_eq!((out_h, out_w), (4, 4));
    }

    #[test]
    fn conv_forward_rejects_mismatched_input_len() {
        let conv = Conv2d::with_default_config(1, 1).unwrap();
        let mut faults = FaultFlags::new();
        let mut output = vec![0i32; 16];
        assert_eq!(conv.forward(&[ONE; 3], &mut output, 4, 4, &mut faults), Err(CtError::Dimension));
    }

    #[test]
    fn conv_kernel_or_stride_of_zero_is_rejected() {
        assert_eq!(Conv2d::new(1, 1, 0, 3, 1, 1, 0, 0).err(), Some(CtError::Config));
        assert_eq!(Conv2d::new(1, 1, 3, 3, 0, 1, 0, 0).err(), Some(CtError::Config));
    }
}
