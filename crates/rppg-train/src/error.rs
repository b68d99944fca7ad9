//! Error types for the rPPG training pipeline.
//!
//! This module is the single source of truth for all error types in the
//! training crate. Every module that produces an error imports its error type
//! from here rather than defining it inline.
//!
//! ## Hierarchy
//!
//! ```text
//! TrainError (top-level)
//! ├── Configuration    (missing data split, missing inference weights)
//! ├── WeightsNotFound  (checkpoint path does not exist at load time)
//! ├── ConfigError      (config validation / file loading)
//! └── DatasetError     (data loading, I/O, format)
//! ```

use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// TrainResult
// ---------------------------------------------------------------------------

/// Convenient `Result` alias used by orchestration-level functions.
pub type TrainResult<T> = Result<T, TrainError>;

// ---------------------------------------------------------------------------
// TrainError
// ---------------------------------------------------------------------------

/// Top-level error type for the rPPG training pipeline.
///
/// Every failure is terminal for the entry point that produced it; nothing in
/// the crate retries.
#[derive(Debug, Error)]
pub enum TrainError {
    /// The run is mis-configured for the requested entry point: a data split
    /// is absent or the inference weights path does not exist.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A checkpoint path does not exist at load time.
    #[error("Model weights not found at `{path}`")]
    WeightsNotFound {
        /// The missing weights file.
        path: PathBuf,
    },

    /// A configuration validation or loading error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A dataset loading or access error.
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    /// Filesystem error outside of dataset access (checkpoints, reports).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writing error while emitting extraction tables.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A batch with zero items reached an operation that averages over items.
    #[error("Batch is empty")]
    EmptyBatch,

    /// A shape mismatch was detected between two arrays.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// A checkpoint could not be saved or loaded.
    #[error("Checkpoint error: {message} (path: {path:?})")]
    Checkpoint {
        /// Human-readable description.
        message: String,
        /// Path that was being accessed.
        path: PathBuf,
    },

    /// Error raised by libtorch.
    #[cfg(feature = "tch-backend")]
    #[error("Torch error: {0}")]
    Tch(#[from] tch::TchError),
}

impl TrainError {
    /// Construct a [`TrainError::Configuration`].
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        TrainError::Configuration(msg.into())
    }

    /// Construct a [`TrainError::Configuration`] for an absent data split.
    pub fn missing_split(split: &str) -> Self {
        TrainError::Configuration(format!("No data for {split}"))
    }

    /// Construct a [`TrainError::Checkpoint`].
    pub fn checkpoint<S: Into<String>>(msg: S, path: impl Into<PathBuf>) -> Self {
        TrainError::Checkpoint { message: msg.into(), path: path.into() }
    }

    /// Construct a [`TrainError::ShapeMismatch`].
    pub fn shape_mismatch(expected: Vec<usize>, actual: Vec<usize>) -> Self {
        TrainError::ShapeMismatch { expected, actual }
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors produced when loading or validating a [`TrainingConfig`].
///
/// [`TrainingConfig`]: crate::config::TrainingConfig
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an invalid value.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// A configuration file could not be read from disk.
    #[error("Cannot read config file `{path}`: {source}")]
    FileRead {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file contains malformed JSON.
    #[error("Cannot parse config file `{path}`: {source}")]
    ParseError {
        /// Path that was being parsed.
        path: PathBuf,
        /// Underlying JSON parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Construct a [`ConfigError::InvalidValue`].
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue { field, reason: reason.into() }
    }
}

// ---------------------------------------------------------------------------
// DatasetError
// ---------------------------------------------------------------------------

/// Errors produced while loading or accessing dataset samples.
///
/// Production training code must not silently suppress these errors. The
/// [`DataLoader`] yields the first unreadable sample as an `Err` item and
/// then stops, so a corrupt chunk fails the pass like a missing directory.
///
/// [`DataLoader`]: crate::dataset::DataLoader
#[derive(Debug, Error)]
pub enum DatasetError {
    /// The data directory does not exist.
    #[error("Directory not found: {path}")]
    DirectoryNotFound {
        /// The path that was not found.
        path: PathBuf,
    },

    /// A sample index is out of bounds.
    #[error("Index {idx} out of bounds (dataset has {len} samples)")]
    IndexOutOfBounds {
        /// The requested index.
        idx: usize,
        /// Total length of the dataset.
        len: usize,
    },

    /// A numpy array file could not be parsed.
    #[error("NumPy read error in `{path}`: {message}")]
    NpyRead {
        /// Path of the `.npy` file.
        path: PathBuf,
        /// Error description.
        message: String,
    },

    /// Samples collated into one batch disagree on their shape.
    #[error("Inconsistent sample shape in batch: expected {expected:?}, got {actual:?}")]
    InconsistentShape {
        /// Shape of the first sample in the batch.
        expected: Vec<usize>,
        /// Shape of the offending sample.
        actual: Vec<usize>,
    },

    /// An I/O error that carries no path context.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DatasetError {
    /// Construct a [`DatasetError::NpyRead`].
    pub fn npy_read<S: Into<String>>(path: impl Into<PathBuf>, msg: S) -> Self {
        DatasetError::NpyRead { path: path.into(), message: msg.into() }
    }
}
