//! XOR training demo: runs the full certifiable-training pipeline end to
//! end — Feistel-permuted batching, forward/backward, an optimizer step,
//! a Merkle chain commit, and periodic checkpoints — grounded in
//! `original_source/examples/train_xor.c`'s network shape, dataset, and
//! default hyperparameters, generalized onto `ctchain-nn`'s layer API and
//! `ctchain-permute`'s batching instead of the original's fixed sample
//! order.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use tracing::{info, warn};

use ctchain_audit::{Checkpoint, MerkleChain};
use ctchain_cli::{CliResult, Optimizer, OptimizerKind, StepRecordFile, TrainingConfig, XorModel};
use ctchain_core::{CtError, DType, FaultFlags, Q16_16, Shape, TensorView};
use ctchain_nn::GradHealth;
use ctchain_permute::BatchContext;
use ctchain_stochastic::Prng;

const ONE: i32 = 1 << 16;

const XOR_INPUTS: [[i32; 2]; 4] = [[0, 0], [0, ONE], [ONE, 0], [ONE, ONE]];
const XOR_TARGETS: [i32; 4] = [0, ONE, ONE, 0];

#[derive(Parser, Debug)]
#[command(name = "train-xor", about = "Train a tiny XOR network through the certifiable-training pipeline")]
struct Args {
    /// Optional JSON file with a `TrainingConfig`; CLI flags below override
    /// individual fields on top of it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    epochs: Option<u32>,
    #[arg(long)]
    hidden_width: Option<usize>,
    #[arg(long)]
    learning_rate_raw: Option<i32>,
    #[arg(long)]
    batch_size: Option<u32>,
    #[arg(long, value_enum)]
    optimizer: Option<CliOptimizerKind>,

    #[arg(long, default_value_t = 500)]
    print_every: u32,
    /// Commit a checkpoint file every N epochs. 0 disables checkpointing.
    #[arg(long, default_value_t = 0)]
    checkpoint_every: u32,
    #[arg(long, default_value = "xor_checkpoint.bin")]
    checkpoint_path: PathBuf,
    /// Write the final training step as a JSON record `verify-step` can
    /// independently check.
    #[arg(long)]
    output_record: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliOptimizerKind {
    Sgd,
    SgdMomentum,
    Adam,
}

impl From<CliOptimizerKind> for OptimizerKind {
    fn from(value: CliOptimizerKind) -> Self {
        match value {
            CliOptimizerKind::Sgd => OptimizerKind::Sgd,
            CliOptimizerKind::SgdMomentum => OptimizerKind::SgdMomentum,
            CliOptimizerKind::Adam => OptimizerKind::Adam,
        }
    }
}

fn load_config(args: &Args) -> CliResult<TrainingConfig> {
    let mut config = match &args.config {
        Some(path) => serde_json::from_slice(&fs::read(path)?)?,
        None => TrainingConfig::default(),
    };

    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(epochs) = args.epochs {
        config.epochs = epochs;
    }
    if let Some(hidden_width) = args.hidden_width {
        config.hidden_width = hidden_width;
    }
    if let Some(lr) = args.learning_rate_raw {
        config.learning_rate_raw = lr;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(optimizer) = args.optimizer {
        config.optimizer = optimizer.into();
    }

    Ok(config)
}

fn print_fixed(x: i32) -> String {
    let (sign, mag) = if x < 0 { ("-", x.wrapping_neg() as u32) } else { ("", x as u32) };
    let int_part = mag >> 16;
    let frac_bits = mag & 0xFFFF;
    let frac_decimal = (frac_bits * 10_000) >> 16;
    format!("{sign}{int_part}.{frac_decimal:04}")
}

fn weights_view(data: &[i32]) -> ctchain_core::CtResult<TensorView<'_>> {
    let shape = Shape::row_major(&[data.len()])?;
    TensorView::new(shape, DType::Q16_16, data)
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn run(args: Args) -> CliResult<bool> {
    let config = load_config(&args)?;
    let config_bytes = config.canonical_bytes()?;

    info!(seed = config.seed, epochs = config.epochs, hidden_width = config.hidden_width, "starting XOR training");

    let mut prng = Prng::new(config.seed, 0);
    let mut model = XorModel::new(config.hidden_width, &mut prng)?;
    let mut optimizer = Optimizer::new(config.optimizer, config.learning_rate_raw, model.total_params())?;

    let mut batch_ctx = BatchContext::new(config.seed, 0, XOR_INPUTS.len() as u32, config.batch_size.min(XOR_INPUTS.len() as u32))?;

    let mut chain = MerkleChain::new();
    {
        let flat = model.weights_flat();
        let view = weights_view(&flat)?;
        chain.init(&view, &config_bytes, config.seed)?;
    }
    info!(hash = %hex::encode(chain.current_hash()), "Merkle chain initialized");

    let mut last_record = None;
    let mut last_weights = model.weights_flat();
    let mut last_batch = Vec::new();
    let mut grad_health = GradHealth::new();

    for epoch in 0..config.epochs {
        batch_ctx.set_epoch(epoch);
        let mut faults = FaultFlags::new();
        let mut epoch_loss = Q16_16::ZERO;

        let step_count = batch_ctx.steps_per_epoch();
        let mut batch_indices = Vec::new();
        for step in 0..step_count {
            let count = batch_ctx.batch_size_at(step) as usize;
            let mut idx_buf = vec![0u32; count];
            batch_ctx.indices_for_step(step, &mut idx_buf, &mut faults);

            for &idx in &idx_buf {
                let input = XOR_INPUTS[idx as usize];
                let target = XOR_TARGETS[idx as usize];

                model.forward(&input, &mut faults)?;
                let (loss, grad_flat) = model.backward(&input, target, &mut faults)?;
                epoch_loss = epoch_loss.add(loss, &mut faults);
                grad_health.update(&grad_flat);

                let mut flat = model.weights_flat();
                optimizer.step(&mut flat, &grad_flat, &mut faults)?;
                model.load_weights_flat(&flat);
            }
            batch_indices.extend_from_slice(&idx_buf);
        }
        grad_health.check(&mut faults);

        let avg_loss = epoch_loss.raw() / XOR_INPUTS.len() as i32;
        let flat = model.weights_flat();
        let view = weights_view(&flat)?;

        let record = match chain.step_chain(&view, &batch_indices, &faults) {
            Ok(record) => record,
            Err(CtError::Fault) => {
                warn!(epoch, "fault observed this epoch, chain is now permanently faulted");
                break;
            }
            Err(other) => return Err(other.into()),
        };

        if args.print_every != 0 && (epoch % args.print_every == 0 || epoch + 1 == config.epochs) {
            info!(epoch, loss = %print_fixed(avg_loss), hash = %hex::encode(&chain.current_hash()[..4]), "epoch complete");
        }

        if args.checkpoint_every != 0 && (epoch % args.checkpoint_every == 0 || epoch + 1 == config.epochs) {
            let config_hash = ctchain_audit::sha256(&config_bytes);
            let checkpoint = Checkpoint::create(&chain, &prng, epoch, &view, config_hash, now_unix())?;
            let mut buf = [0u8; ctchain_audit::checkpoint::SERIAL_SIZE];
            checkpoint.serialize(&mut buf)?;
            fs::write(&args.checkpoint_path, buf)?;
        }

        last_weights = flat;
        last_batch = batch_indices;
        last_record = Some(record);
    }

    if let (Some(record), Some(path)) = (&last_record, &args.output_record) {
        let file = StepRecordFile::from_record(record, last_weights.clone(), last_batch.clone());
        fs::write(path, serde_json::to_vec_pretty(&file)?)?;
    }

    let mut faults = FaultFlags::new();
    let mut correct = 0;
    for (input, target) in XOR_INPUTS.iter().zip(XOR_TARGETS.iter()) {
        let pred = model.forward(input, &mut faults)?;
        let pred_class = pred > ONE / 2;
        let target_class = *target > ONE / 2;
        if pred_class == target_class {
            correct += 1;
        }
        info!(
            in0 = input[0] > ONE / 2,
            in1 = input[1] > ONE / 2,
            pred = %print_fixed(pred),
            pred_class,
            target_class,
            "final prediction"
        );
    }

    if grad_health.is_vanishing() {
        warn!(zero_ratio = %print_fixed(grad_health.zero_ratio().raw()), "gradients vanished past the floor threshold at some point during training");
    }

    info!(correct, total = XOR_INPUTS.len(), valid = chain.is_valid(), "training complete");

    Ok(correct == XOR_INPUTS.len() && chain.is_valid())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
