//! Training configuration for the rPPG pipeline.
//!
//! [`TrainingConfig`] is the single source of truth for hyper-parameters,
//! sampling rates, checkpoint locations and the toolbox mode. It is
//! serializable via [`serde`] so runs can be described by a JSON file and the
//! effective configuration stored next to the checkpoints.
//!
//! # Example
//!
//! ```rust
//! use rppg_train::config::{ToolboxMode, TrainingConfig};
//!
//! let cfg = TrainingConfig::default();
//! cfg.validate().expect("default config is valid");
//!
//! assert_eq!(cfg.toolbox_mode, ToolboxMode::TrainAndTest);
//! assert_eq!(cfg.chunk_len, 160);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Which entry points a run goes through and which weights `test` loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolboxMode {
    /// Train (with optional per-epoch validation), then test.
    TrainAndTest,
    /// Test a pretrained model loaded from `inference_model_path`.
    OnlyTest,
    /// Run the pretrained model over unlabelled clips and write CSV tables.
    ExtractOnly,
}

impl std::fmt::Display for ToolboxMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ToolboxMode::TrainAndTest => "train_and_test",
            ToolboxMode::OnlyTest => "only_test",
            ToolboxMode::ExtractOnly => "extract_only",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ToolboxMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train_and_test" => Ok(ToolboxMode::TrainAndTest),
            "only_test" => Ok(ToolboxMode::OnlyTest),
            "extract_only" => Ok(ToolboxMode::ExtractOnly),
            other => Err(ConfigError::invalid_value(
                "toolbox_mode",
                format!("unknown mode `{other}`"),
            )),
        }
    }
}

/// Representation of the ground-truth waveform produced by preprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelType {
    /// Raw PPG amplitude.
    Raw,
    /// First differences, normalised by their standard deviation.
    DiffNormalized,
    /// Z-scored amplitude.
    Standardized,
}

// ---------------------------------------------------------------------------
// TrainingConfig
// ---------------------------------------------------------------------------

/// Complete configuration for an rPPG training / evaluation / extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    // -----------------------------------------------------------------------
    // Mode
    // -----------------------------------------------------------------------
    /// Which entry points are reachable. Default: **train_and_test**.
    pub toolbox_mode: ToolboxMode,

    // -----------------------------------------------------------------------
    // Data / Signal
    // -----------------------------------------------------------------------
    /// Frames per clip chunk; also the slice width used by test and extract
    /// bookkeeping. Default: **160**.
    pub chunk_len: usize,

    /// Sampling rate (frames per second) of the training split. Default: **30**.
    pub train_fs: f64,

    /// Sampling rate of the validation split. Also used by the augmenter's
    /// heart-rate estimate. Default: **30**.
    pub valid_fs: f64,

    /// Sampling rate of the test split. Default: **30**.
    pub test_fs: f64,

    /// Label representation. Default: **DiffNormalized**.
    pub label_type: LabelType,

    /// Directory of preprocessed training chunks.
    pub train_data_dir: Option<PathBuf>,

    /// Directory of preprocessed validation chunks.
    pub valid_data_dir: Option<PathBuf>,

    /// Directory of preprocessed test chunks.
    pub test_data_dir: Option<PathBuf>,

    /// Directory of preprocessed (unlabelled) extraction chunks.
    pub extract_data_dir: Option<PathBuf>,

    // -----------------------------------------------------------------------
    // Optimisation
    // -----------------------------------------------------------------------
    /// Mini-batch size. Default: **4**.
    pub batch_size: usize,

    /// Peak learning rate of the one-cycle schedule. Default: **1e-3**.
    pub learning_rate: f64,

    /// Total number of training epochs. Default: **30**.
    pub num_epochs: usize,

    /// Apply heart-rate-conditioned temporal augmentation to training
    /// batches. Default: **false**.
    pub augment: bool,

    /// Shuffle the training split every epoch. Default: **true**.
    pub shuffle_train: bool,

    // -----------------------------------------------------------------------
    // Model selection and checkpointing
    // -----------------------------------------------------------------------
    /// Test with the last epoch instead of the best validation epoch. When
    /// `true` validation is skipped during training. Default: **false**.
    pub use_last_epoch: bool,

    /// Directory where per-epoch checkpoints are written.
    pub model_dir: PathBuf,

    /// Base file name of checkpoints (`{name}_Epoch{n}.pth`).
    pub model_file_name: String,

    /// Pretrained weights used by `only_test` and `extract_only`.
    pub inference_model_path: Option<PathBuf>,

    /// Directory receiving `predictions_by_vid.csv` and
    /// `predictions_by_segment.csv`. Default: **`.`**.
    pub extract_output_dir: PathBuf,

    /// Directory receiving the test metrics report.
    pub log_dir: PathBuf,

    // -----------------------------------------------------------------------
    // Device
    // -----------------------------------------------------------------------
    /// Use a CUDA GPU when available. Default: **false**.
    pub use_gpu: bool,

    /// CUDA device index when `use_gpu` is `true`. Default: **0**.
    pub gpu_device_id: usize,

    /// Number of accelerator replicas the model is replicated across.
    /// Loss averaging is always over the global batch. Default: **1**.
    pub num_gpus: usize,

    // -----------------------------------------------------------------------
    // Reproducibility
    // -----------------------------------------------------------------------
    /// Seed for the shuffler, the augmenter and model initialisation.
    /// Default: **42**.
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            toolbox_mode: ToolboxMode::TrainAndTest,
            // Data
            chunk_len: 160,
            train_fs: 30.0,
            valid_fs: 30.0,
            test_fs: 30.0,
            label_type: LabelType::DiffNormalized,
            train_data_dir: None,
            valid_data_dir: None,
            test_data_dir: None,
            extract_data_dir: None,
            // Optimisation
            batch_size: 4,
            learning_rate: 1e-3,
            num_epochs: 30,
            augment: false,
            shuffle_train: true,
            // Selection / checkpointing
            use_last_epoch: false,
            model_dir: PathBuf::from("runs/exp/models"),
            model_file_name: "rppg_model".to_string(),
            inference_model_path: None,
            extract_output_dir: PathBuf::from("."),
            log_dir: PathBuf::from("runs/exp/logs"),
            // Device
            use_gpu: false,
            gpu_device_id: 0,
            num_gpus: 1,
            // Reproducibility
            seed: 42,
        }
    }
}

impl TrainingConfig {
    /// Load a [`TrainingConfig`] from a JSON file at `path`.
    ///
    /// Missing fields take their default value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] if the file cannot be opened,
    /// [`ConfigError::ParseError`] if the JSON is malformed and
    /// [`ConfigError::InvalidValue`] if validation fails.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: TrainingConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::ParseError {
                path: path.to_path_buf(),
                source,
            })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize this configuration to pretty-printed JSON and write it to
    /// `path`, creating parent directories if necessary.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::FileRead {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::invalid_value("(serialization)", e.to_string()))?;
        std::fs::write(path, json).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// `true` when labels are first-difference normalised.
    pub fn diff_flag(&self) -> bool {
        self.label_type == LabelType::DiffNormalized
    }

    /// Index of the final training epoch's checkpoint.
    pub fn last_epoch(&self) -> usize {
        self.num_epochs.saturating_sub(1)
    }

    /// Validate all fields and return an error describing the first problem
    /// found, or `Ok(())` if the configuration is coherent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_len == 0 {
            return Err(ConfigError::invalid_value("chunk_len", "must be > 0"));
        }
        for (field, fs) in [
            ("train_fs", self.train_fs),
            ("valid_fs", self.valid_fs),
            ("test_fs", self.test_fs),
        ] {
            if !(fs.is_finite() && fs > 0.0) {
                return Err(ConfigError::invalid_value(field, "must be a positive finite rate"));
            }
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid_value("batch_size", "must be > 0"));
        }
        if self.learning_rate <= 0.0 {
            return Err(ConfigError::invalid_value("learning_rate", "must be > 0.0"));
        }
        if self.num_epochs == 0 {
            return Err(ConfigError::invalid_value("num_epochs", "must be > 0"));
        }
        if self.model_file_name.is_empty() {
            return Err(ConfigError::invalid_value("model_file_name", "must not be empty"));
        }
        if self.model_file_name.contains(['/', '\\']) {
            return Err(ConfigError::invalid_value(
                "model_file_name",
                "must be a bare file name, not a path",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
