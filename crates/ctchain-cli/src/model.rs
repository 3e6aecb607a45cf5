//! The XOR network `original_source/examples/train_xor.c` hard-codes
//! (`2 -> hidden (ReLU) -> 1 (sigmoid)`), rebuilt on `ctchain-nn`'s generic
//! `Linear`/`Activation` primitives instead of the original's inlined
//! per-layer math.

use ctchain_core::{CtResult, FaultFlags, Q16_16, Q8_24};
use ctchain_nn::{loss, Activation, ActivationKind, Linear, LinearGrad};
use ctchain_stochastic::Prng;

pub const INPUT_SIZE: usize = 2;
pub const OUTPUT_SIZE: usize = 1;

/// Two-layer MLP: caches pre/post-activation buffers so `backward` never
/// needs to re-run `forward`.
pub struct XorModel {
    hidden_width: usize,
    fc1: Linear,
    act1: Activation,
    fc2: Linear,
    act2: Activation,
    grad1: LinearGrad,
    grad2: LinearGrad,
    hidden_pre: Vec<i32>,
    hidden_post: Vec<i32>,
    output_pre: Vec<i32>,
    output_post: Vec<i32>,
}

fn init_uniform(prng: &mut Prng, span: u32, offset: i32) -> i32 {
    (prng.next() % span) as i32 + offset
}

impl XorModel {
    /// Mirrors `train_xor.c`'s `init_weights`: wide range for the input
    /// layer, a small positive bias to keep ReLU units alive, a narrower
    /// range for the output layer, and a zero output bias.
    pub fn new(hidden_width: usize, prng: &mut Prng) -> CtResult<Self> {
        let mut fc1 = Linear::new(INPUT_SIZE, hidden_width)?;
        for w in fc1.weights_mut().iter_mut() {
            *w = init_uniform(prng, 131_072, -65_536);
        }
        for b in fc1.bias_mut().iter_mut() {
            *b = init_uniform(prng, 6_554, 0);
        }

        let mut fc2 = Linear::new(hidden_width, OUTPUT_SIZE)?;
        for w in fc2.weights_mut().iter_mut() {
            *w = init_uniform(prng, 65_536, -32_768);
        }
        for b in fc2.bias_mut().iter_mut() {
            *b = 0;
        }

        Ok(Self {
            hidden_width,
            fc1,
            act1: Activation::new(ActivationKind::Relu),
            fc2,
            act2: Activation::new(ActivationKind::Sigmoid),
            grad1: LinearGrad::new(INPUT_SIZE, hidden_width),
            grad2: LinearGrad::new(hidden_width, OUTPUT_SIZE),
            hidden_pre: vec![0; hidden_width],
            hidden_post: vec![0; hidden_width],
            output_pre: vec![0; OUTPUT_SIZE],
            output_post: vec![0; OUTPUT_SIZE],
        })
    }

    pub fn total_params(&self) -> usize {
        self.hidden_width * INPUT_SIZE + self.hidden_width + OUTPUT_SIZE * self.hidden_width + OUTPUT_SIZE
    }

    /// Flatten `w1, b1, w2, b2` into one buffer, the logical equivalent of
    /// `train_xor.c`'s single `all_weights` array (spec §4.8 hashes the
    /// whole parameter set as one tensor).
    pub fn weights_flat(&self) -> Vec<i32> {
        let mut out = Vec::with_capacity(self.total_params());
        out.extend_from_slice(self.fc1.weights());
        out.extend_from_slice(self.fc1.bias());
        out.extend_from_slice(self.fc2.weights());
        out.extend_from_slice(self.fc2.bias());
        out
    }

    pub fn load_weights_flat(&mut self, flat: &[i32]) {
        debug_assert_eq!(flat.len(), self.total_params());
        let mut p = 0;
        let w1_len = self.fc1.weights().len();
        self.fc1.weights_mut().copy_from_slice(&flat[p..p + w1_len]);
        p += w1_len;
        let b1_len = self.fc1.bias().len();
        self.fc1.bias_mut().copy_from_slice(&flat[p..p + b1_len]);
        p += b1_len;
        let w2_len = self.fc2.weights().len();
        self.fc2.weights_mut().copy_from_slice(&flat[p..p + w2_len]);
        p += w2_len;
        let b2_len = self.fc2.bias().len();
        self.fc2.bias_mut().copy_from_slice(&flat[p..p + b2_len]);
    }

    pub fn forward(&mut self, input: &[i32], faults: &mut FaultFlags) -> CtResult<i32> {
        self.fc1.forward(input, &mut self.hidden_pre, faults)?;
        self.act1.forward(&self.hidden_pre, &mut self.hidden_post);
        self.fc2.forward(&self.hidden_post, &mut self.output_pre, faults)?;
        self.act2.forward(&self.output_pre, &mut self.output_post);
        Ok(self.output_post[0])
    }

    /// Runs loss + backward from the cached last `forward` call, returning
    /// the loss and the flat Q8.24 gradient in `weights_flat`'s layout.
    pub fn backward(&mut self, input: &[i32], target: i32, faults: &mut FaultFlags) -> CtResult<(Q16_16, Vec<i32>)> {
        let output = [self.output_post[0]];
        let targets = [target];
        let loss_value = loss::mse_forward(&output, &targets, faults)?;

        let mut grad_output = [0i32];
        loss::mse_backward(&output, &targets, &mut grad_output, faults)?;

        let grad_pre2 = self.act2.backward(Q8_24::from_raw(grad_output[0]), Q16_16::from_raw(self.output_post[0]), faults);
        let grad_pre2_arr = [grad_pre2.raw()];

        let mut grad_hidden_post = vec![0i32; self.hidden_width];
        self.grad2.backward(&self.fc2, &self.hidden_post, &grad_pre2_arr, Some(&mut grad_hidden_post), faults)?;

        let mut grad_hidden_pre = vec![0i32; self.hidden_width];
        for h in 0..self.hidden_width {
            let g = self.act1.backward(Q8_24::from_raw(grad_hidden_post[h]), Q16_16::from_raw(self.hidden_pre[h]), faults);
            grad_hidden_pre[h] = g.raw();
        }

        self.grad1.backward(&self.fc1, input, &grad_hidden_pre, None, faults)?;

        let mut grad_flat = Vec::with_capacity(self.total_params());
        grad_flat.extend_from_slice(&self.grad1.grad_weights);
        grad_flat.extend_from_slice(&self.grad1.grad_bias);
        grad_flat.extend_from_slice(&self.grad2.grad_weights);
        grad_flat.extend_from_slice(&self.grad2.grad_bias);

        Ok((loss_value, grad_flat))
    }
}
