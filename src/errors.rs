use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, WdFitError>;

/// Error taxonomy for grid building, posterior setup and sampling.
///
/// Proposal-level invalidity (a parameter outside its prior bounds, a
/// non-finite likelihood) is never an error: it is represented as a
/// negative-infinite log-posterior so the sampler rejects the move.
#[derive(Debug, Error)]
pub enum WdFitError {
    /// Bad directory, empty grid axis, malformed passband, discard larger
    /// than the recorded chain, invalid sampler geometry. Fatal at setup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Requested wavelength bounds outside the input coverage, or a grid
    /// query outside the convex hull of the grid axes.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// A worker failed during a distributed evaluation round. Fatal: the
    /// round is not committed and the run aborts.
    #[error("worker failure during likelihood evaluation: {0}")]
    WorkerFailure(String),

    /// Results already exist for this fit and redo was not requested.
    #[error("output {} already exists; rerun with redo to overwrite", .0.display())]
    OutputExists(PathBuf),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(String),
}

impl From<serde_json::Error> for WdFitError {
    fn from(err: serde_json::Error) -> Self {
        WdFitError::Serde(err.to_string())
    }
}

impl From<bincode::Error> for WdFitError {
    fn from(err: bincode::Error) -> Self {
        WdFitError::Serde(err.to_string())
    }
}
