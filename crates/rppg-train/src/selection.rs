//! Best-epoch tracking on validation loss.

use serde::{Deserialize, Serialize};

/// Minimum validation loss seen so far and the epoch that produced it.
///
/// Created once per trainer and updated at most once per epoch; never reset
/// mid-run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochState {
    /// `None` until the first validation result arrives.
    pub min_valid_loss: Option<f64>,
    /// Epoch of [`min_valid_loss`](Self::min_valid_loss). `0` before any update.
    pub best_epoch: usize,
}

/// Strategy used to decide which checkpoint the test pass loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSelector {
    /// Always evaluate the final epoch; validation is skipped.
    LastEpoch,
    /// Evaluate the epoch with the lowest validation loss.
    BestValidation,
}

impl ModelSelector {
    /// Selector for the `use_last_epoch` configuration flag.
    pub fn from_use_last_epoch(use_last_epoch: bool) -> Self {
        if use_last_epoch {
            ModelSelector::LastEpoch
        } else {
            ModelSelector::BestValidation
        }
    }

    /// Whether validation runs after each training epoch.
    pub fn validates(self) -> bool {
        self == ModelSelector::BestValidation
    }

    /// Epoch whose checkpoint the test pass should load.
    pub fn selected_epoch(self, state: &EpochState, last_epoch: usize) -> usize {
        match self {
            ModelSelector::LastEpoch => last_epoch,
            ModelSelector::BestValidation => state.best_epoch,
        }
    }
}

impl EpochState {
    /// Record `valid_loss` for `epoch`.
    ///
    /// Replaces the stored minimum when none exists yet or when `valid_loss`
    /// is strictly smaller. Ties keep the earlier epoch. Returns `true` when
    /// the state changed.
    pub fn update(&mut self, valid_loss: f64, epoch: usize) -> bool {
        let improved = match self.min_valid_loss {
            None => true,
            Some(min) => valid_loss < min,
        };
        if improved {
            self.min_valid_loss = Some(valid_loss);
            self.best_epoch = epoch;
        }
        improved
    }
}
