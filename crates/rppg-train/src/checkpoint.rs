//! Epoch-indexed model checkpoints.
//!
//! Weights for epoch `n` live at `{model_dir}/{file_name}_Epoch{n}.pth`.
//! A checkpoint is written once and never modified afterwards.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::TrainingConfig;
use crate::error::{TrainError, TrainResult};

/// Resolves and manages checkpoint files for one training run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpointer {
    model_dir: PathBuf,
    file_name: String,
}

impl Checkpointer {
    /// Checkpointer writing `{model_dir}/{file_name}_Epoch{n}.pth`.
    pub fn new(model_dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self { model_dir: model_dir.into(), file_name: file_name.into() }
    }

    /// Checkpointer for the directory and base name in `config`.
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self::new(config.model_dir.clone(), config.model_file_name.clone())
    }

    /// Directory holding the checkpoints.
    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Path of the checkpoint for `epoch`.
    pub fn checkpoint_path(&self, epoch: usize) -> PathBuf {
        self.model_dir.join(format!("{}_Epoch{}.pth", self.file_name, epoch))
    }

    /// Create the checkpoint directory if needed. Idempotent.
    pub fn ensure_dir(&self) -> TrainResult<()> {
        fs::create_dir_all(&self.model_dir)?;
        Ok(())
    }

    /// Return `path` if it exists.
    ///
    /// # Errors
    ///
    /// [`TrainError::WeightsNotFound`] when nothing exists at `path`.
    pub fn resolve_existing(path: &Path) -> TrainResult<&Path> {
        if path.exists() {
            Ok(path)
        } else {
            Err(TrainError::WeightsNotFound { path: path.to_path_buf() })
        }
    }

    /// Save the weights in `vs` as the checkpoint for `epoch`.
    #[cfg(feature = "tch-backend")]
    pub fn save(&self, vs: &tch::nn::VarStore, epoch: usize) -> TrainResult<PathBuf> {
        self.ensure_dir()?;
        let path = self.checkpoint_path(epoch);
        vs.save(&path)
            .map_err(|e| TrainError::checkpoint(format!("save failed: {e}"), &path))?;
        tracing::info!("Saved Model Path: {}", path.display());
        Ok(path)
    }

    /// Load the weights at `path` into `vs`.
    ///
    /// `vs` must already hold every variable of the architecture the
    /// checkpoint was written from.
    ///
    /// # Errors
    ///
    /// [`TrainError::WeightsNotFound`] for a missing file,
    /// [`TrainError::Checkpoint`] when the file does not match `vs`.
    #[cfg(feature = "tch-backend")]
    pub fn load(vs: &mut tch::nn::VarStore, path: &Path) -> TrainResult<()> {
        let path = Self::resolve_existing(path)?;
        vs.load(path)
            .map_err(|e| TrainError::checkpoint(format!("load failed: {e}"), path))?;
        tracing::info!("Loaded weights from {}", path.display());
        Ok(())
    }
}
