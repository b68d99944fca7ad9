//! One-cycle learning-rate schedule.
//!
//! Two cosine phases over `total_steps` optimiser steps:
//!
//! ```text
//!  lr  max ┤      ╭──╮
//!          │    ╭─╯   ╰──╮
//!  max/25  ┤───╯          ╰───╮
//!          │                   ╰─────  max/25/1e4
//!          └────┬──────────────────┬─
//!               0.3·T − 1          T − 1
//! ```
//!
//! Momentum (Adam β₁) moves in the opposite direction, from 0.95 down to 0.85
//! during warm-up and back up to 0.95 during annealing.

use std::f64::consts::PI;

/// Per-step one-cycle schedule.
///
/// Step `k` is the index of the optimiser step about to be taken, starting at
/// 0. Steps past the end clamp to the last value.
#[derive(Debug, Clone, PartialEq)]
pub struct OneCycleLr {
    max_lr: f64,
    total_steps: usize,
    /// Fraction of the cycle spent increasing the rate. Default: **0.3**.
    pub pct_start: f64,
    /// `initial_lr = max_lr / div_factor`. Default: **25**.
    pub div_factor: f64,
    /// `min_lr = initial_lr / final_div_factor`. Default: **1e4**.
    pub final_div_factor: f64,
    /// Momentum at the learning-rate peak. Default: **0.85**.
    pub base_momentum: f64,
    /// Momentum at both ends of the cycle. Default: **0.95**.
    pub max_momentum: f64,
}

impl OneCycleLr {
    /// Schedule peaking at `max_lr` over `epochs × steps_per_epoch` steps.
    pub fn new(max_lr: f64, epochs: usize, steps_per_epoch: usize) -> Self {
        Self {
            max_lr,
            total_steps: epochs * steps_per_epoch,
            pct_start: 0.3,
            div_factor: 25.0,
            final_div_factor: 1e4,
            base_momentum: 0.85,
            max_momentum: 0.95,
        }
    }

    /// Total number of optimiser steps in the cycle.
    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Learning rate at the start of the cycle.
    pub fn initial_lr(&self) -> f64 {
        self.max_lr / self.div_factor
    }

    /// Learning rate at the end of the cycle.
    pub fn min_lr(&self) -> f64 {
        self.initial_lr() / self.final_div_factor
    }

    /// Learning rate for step `step`.
    pub fn lr(&self, step: usize) -> f64 {
        self.interpolate(
            step,
            (self.initial_lr(), self.max_lr),
            (self.max_lr, self.min_lr()),
        )
    }

    /// Momentum for step `step`.
    pub fn momentum(&self, step: usize) -> f64 {
        self.interpolate(
            step,
            (self.max_momentum, self.base_momentum),
            (self.base_momentum, self.max_momentum),
        )
    }

    fn interpolate(&self, step: usize, warmup: (f64, f64), anneal: (f64, f64)) -> f64 {
        if self.total_steps == 0 {
            return warmup.0;
        }
        let step = step.min(self.total_steps - 1) as f64;
        let end_warmup = self.pct_start * self.total_steps as f64 - 1.0;
        let end_anneal = self.total_steps as f64 - 1.0;

        if step <= end_warmup {
            let pct = step / end_warmup;
            cosine(warmup.0, warmup.1, pct)
        } else {
            let pct = (step - end_warmup) / (end_anneal - end_warmup);
            cosine(anneal.0, anneal.1, pct)
        }
    }
}

fn cosine(start: f64, end: f64, pct: f64) -> f64 {
    end + (start - end) / 2.0 * ((PI * pct).cos() + 1.0)
}
