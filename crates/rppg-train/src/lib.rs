//! # rPPG Training Infrastructure
//!
//! This crate provides the training, evaluation and extraction pipeline for
//! video-based remote photoplethysmography (rPPG) models: configuration
//! management, chunked `.npy` datasets, heart-rate-conditioned augmentation,
//! per-clip losses, checkpointing with best-epoch selection, reassembly of
//! chunked predictions and heart-rate metrics.
//!
//! ## Architecture
//!
//! ```text
//! TrainingConfig ──► Trainer ──► RppgModel (BaselineRppgNet)
//!       │               │
//!       │               ├── DataSplits ──► DataLoader ──► RppgDataset
//!       │               │                   (NpyChunkDataset | SyntheticRppgDataset)
//!       │               ├── TemporalAugmenter ──► HeartRateEstimator
//!       │               ├── normalize ──► LossAccumulator ──► PerSampleLoss
//!       │               ├── Checkpointer + EpochState / ModelSelector
//!       │               └── ChunkAggregator / ExtractionRecord
//!       │
//!       └──► MetricsCollector (HeartRateMetricsCollector)
//! ```
//!
//! The model, the differentiable loss and the [`trainer`] need libtorch and
//! are compiled with the `tch-backend` feature. Everything else works on
//! `ndarray` arrays.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rppg_train::config::TrainingConfig;
//! use rppg_train::dataset::{RppgDataset, SyntheticConfig, SyntheticRppgDataset};
//!
//! // Build config
//! let config = TrainingConfig::default();
//! config.validate().expect("config is valid");
//!
//! // Create a synthetic dataset (deterministic)
//! let dataset = SyntheticRppgDataset::new(16, SyntheticConfig::default());
//!
//! // Load one sample
//! let sample = dataset.get(0).unwrap();
//! println!("clip shape: {:?}", sample.clip.shape());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregate;
pub mod augment;
pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod heart_rate;
pub mod losses;
pub mod metrics;
pub mod normalize;
pub mod schedule;
pub mod selection;

#[cfg(feature = "tch-backend")]
pub mod model;
#[cfg(feature = "tch-backend")]
pub mod trainer;

// Convenient re-exports at the crate root.
pub use aggregate::{ChunkAggregator, ExtractionRecord, SubjectPredictionMap};
pub use augment::TemporalAugmenter;
pub use checkpoint::Checkpointer;
pub use config::{LabelType, ToolboxMode, TrainingConfig};
pub use dataset::{
    DataLoader, DataSplits, NpyChunkDataset, RppgBatch, RppgDataset, RppgSample, SampleMeta,
    SyntheticConfig, SyntheticRppgDataset,
};
pub use error::{ConfigError, DatasetError, TrainError, TrainResult};
pub use heart_rate::{FftHeartRateEstimator, HeartRateEstimate, HeartRateEstimator};
pub use losses::{LossAccumulator, LossContext, NegPearsonLoss, PerSampleLoss};
pub use metrics::{HeartRateMetrics, HeartRateMetricsCollector, MetricsCollector};
pub use normalize::normalize_rows;
pub use schedule::OneCycleLr;
pub use selection::{EpochState, ModelSelector};

#[cfg(feature = "tch-backend")]
pub use model::{BaselineConfig, BaselineRppgNet, RppgModel};
#[cfg(feature = "tch-backend")]
pub use trainer::{run_toolbox, select_device, Trainer};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
