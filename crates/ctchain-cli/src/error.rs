//! Driver-level error type, wrapping the numeric/audit `CtError` with the
//! I/O and serialization failures a CLI binary can hit that a library crate
//! never needs to express.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("training/audit error: {0}")]
    Ct(#[from] ctchain_core::CtError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("record field {0} is not 32 bytes")]
    BadHashLength(&'static str),
    #[error("step record failed independent verification")]
    VerificationFailed,
}

pub type CliResult<T> = Result<T, CliError>;
