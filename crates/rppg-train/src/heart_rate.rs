//! Heart-rate estimation from a pulse waveform.
//!
//! The training pipeline treats heart-rate estimation as an external
//! collaborator behind [`HeartRateEstimator`]. The default implementation,
//! [`FftHeartRateEstimator`], picks the dominant spectral peak inside the
//! cardiac band:
//!
//! 1. Diff-normalised labels are integrated back to a pulse shape
//!    (cumulative sum).
//! 2. The DC component is removed.
//! 3. The signal is zero-padded to the next power of two and transformed
//!    with `rustfft`.
//! 4. The bin with the highest power in `[min_hz, max_hz]` gives the rate,
//!    `bpm = 60 × f_peak`.

use ndarray::ArrayView1;
use rustfft::{num_complex::Complex, FftPlanner};

/// Heart rates estimated for a signal and its reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartRateEstimate {
    /// Rate of the analysed signal in beats per minute.
    pub hr_bpm: f64,
    /// Rate of the reference signal in beats per minute.
    pub reference_bpm: f64,
}

/// Estimates heart rate from a 1-D waveform.
///
/// `diff_flag` tells the estimator that the inputs are first-difference
/// normalised; `fs` is the sampling rate in Hz.
pub trait HeartRateEstimator {
    /// Estimate the rates of `signal` and `reference`.
    fn estimate(
        &self,
        signal: ArrayView1<'_, f32>,
        reference: ArrayView1<'_, f32>,
        diff_flag: bool,
        fs: f64,
    ) -> HeartRateEstimate;
}

impl<F> HeartRateEstimator for F
where
    F: Fn(ArrayView1<'_, f32>, ArrayView1<'_, f32>, bool, f64) -> HeartRateEstimate,
{
    fn estimate(
        &self,
        signal: ArrayView1<'_, f32>,
        reference: ArrayView1<'_, f32>,
        diff_flag: bool,
        fs: f64,
    ) -> HeartRateEstimate {
        self(signal, reference, diff_flag, fs)
    }
}

// ---------------------------------------------------------------------------
// FftHeartRateEstimator
// ---------------------------------------------------------------------------

/// Spectral-peak heart-rate estimator.
#[derive(Debug, Clone)]
pub struct FftHeartRateEstimator {
    /// Lower edge of the cardiac band in Hz. Default: **0.75** (45 BPM).
    pub min_hz: f64,
    /// Upper edge of the cardiac band in Hz. Default: **2.5** (150 BPM).
    pub max_hz: f64,
}

impl Default for FftHeartRateEstimator {
    fn default() -> Self {
        Self { min_hz: 0.75, max_hz: 2.5 }
    }
}

impl FftHeartRateEstimator {
    /// Dominant rate of a single waveform in BPM.
    ///
    /// Returns `NaN` when the signal is empty or no FFT bin falls inside the
    /// cardiac band (window too short for the sampling rate).
    pub fn dominant_bpm(&self, signal: ArrayView1<'_, f32>, diff_flag: bool, fs: f64) -> f64 {
        if signal.is_empty() {
            return f64::NAN;
        }

        let mut pulse: Vec<f64> = if diff_flag {
            signal
                .iter()
                .scan(0.0_f64, |acc, &v| {
                    *acc += v as f64;
                    Some(*acc)
                })
                .collect()
        } else {
            signal.iter().map(|&v| v as f64).collect()
        };

        let mean = pulse.iter().sum::<f64>() / pulse.len() as f64;
        pulse.iter_mut().for_each(|v| *v -= mean);

        let n = pulse.len().next_power_of_two();
        let mut buffer: Vec<Complex<f64>> =
            pulse.iter().map(|&x| Complex::new(x, 0.0)).collect();
        buffer.resize(n, Complex::new(0.0, 0.0));

        let mut planner = FftPlanner::new();
        planner.plan_fft_forward(n).process(&mut buffer);

        let resolution = fs / n as f64;
        let mut best: Option<(usize, f64)> = None;
        for (k, c) in buffer.iter().enumerate().take(n / 2 + 1) {
            let freq = k as f64 * resolution;
            if freq < self.min_hz || freq > self.max_hz {
                continue;
            }
            let power = c.norm_sqr();
            if best.map_or(true, |(_, p)| power > p) {
                best = Some((k, power));
            }
        }

        match best {
            Some((k, _)) => k as f64 * resolution * 60.0,
            None => f64::NAN,
        }
    }
}

impl HeartRateEstimator for FftHeartRateEstimator {
    fn estimate(
        &self,
        signal: ArrayView1<'_, f32>,
        reference: ArrayView1<'_, f32>,
        diff_flag: bool,
        fs: f64,
    ) -> HeartRateEstimate {
        HeartRateEstimate {
            hr_bpm: self.dominant_bpm(signal, diff_flag, fs),
            reference_bpm: self.dominant_bpm(reference, diff_flag, fs),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
