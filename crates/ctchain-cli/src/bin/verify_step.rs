//! Offline checker for a single training step record (spec §4.8's "Verify
//! step"): loads a [`StepRecordFile`], independently recomputes its weights,
//! batch, and chain-link hashes, and reports match/mismatch.
//!
//! `original_source/examples/verify_step.c` never implemented this (it is a
//! `printf("TODO: Implement\n")` stub), so this binary's shape is grounded
//! directly in spec §4.8 and [`ctchain_audit::verify_step`]'s contract rather
//! than a C precedent.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use ctchain_cli::StepRecordFile;

#[derive(Parser, Debug)]
#[command(name = "verify-step", about = "Independently verify a training step record")]
struct Args {
    /// JSON file written by `train-xor --output-record`.
    record: PathBuf,
}

fn run(args: Args) -> ctchain_cli::CliResult<bool> {
    let bytes = fs::read(&args.record)?;
    let file: StepRecordFile = serde_json::from_slice(&bytes)?;

    match file.verify() {
        Ok(()) => {
            info!(step = file.step, "record verified: all hash commitments match");
            Ok(true)
        }
        Err(err) => {
            error!(step = file.step, %err, "record failed verification");
            Ok(false)
        }
    }
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
