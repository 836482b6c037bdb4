//! Reference correlation: does the green channel pulse like a screen that
//! flashes at a steady rate?
//!
//! No challenge metadata is needed. The flash period is estimated from the
//! signal itself, a square wave with that period is synthesised, and the two
//! are cross-correlated. A live face lit by the screen tracks the square wave
//! closely; an unlit or static replay does not.

use crate::dsp::{argmax, correlate_full, find_peaks, normalize_unit, square_wave, PeakParams};
use crate::verdict::{Diagnostics, Reason, Verdict};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

/// Minimum prominence of a peak in the unit-normalised signal.
pub const DEFAULT_PROMINENCE: f64 = 0.2;
/// Minimum spacing, in samples, between peaks used for the period estimate.
pub const DEFAULT_PEAK_DISTANCE: usize = 10;
/// Correlation that must be exceeded to accept the clip.
pub const DEFAULT_MIN_CORRELATION: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReferenceConfig {
    pub prominence: f64,
    pub peak_distance: usize,
    pub min_correlation: f64,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            prominence: DEFAULT_PROMINENCE,
            peak_distance: DEFAULT_PEAK_DISTANCE,
            min_correlation: DEFAULT_MIN_CORRELATION,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceAnalysis {
    pub verified: bool,
    /// Peak indices used for the period estimate.
    pub peaks: Vec<usize>,
    /// Mean spacing of `peaks`, in samples.
    pub avg_period: f64,
    /// Largest normalised correlation coefficient, in `[-1, 1]`.
    pub max_corr: f64,
    /// Shift (samples) of best alignment; informational.
    pub lag: i64,
}

impl ReferenceAnalysis {
    pub fn verdict(&self) -> Verdict {
        let reason = if self.verified {
            Reason::LivenessVerified
        } else {
            Reason::PatternMismatch
        };
        Verdict::new(self.verified, self.max_corr, reason).with_diagnostics(Diagnostics {
            lag: Some(self.lag),
            correlation: Some(self.max_corr),
            ..Default::default()
        })
    }
}

/// Best normalised cross-correlation of `signal` against `reference`, and
/// the lag it occurs at.
///
/// Both inputs are mean-centred before correlating. When either is constant
/// the coefficient is 0.
pub fn normalized_cross_correlation(
    signal: ArrayView1<'_, f64>,
    reference: ArrayView1<'_, f64>,
) -> (f64, i64) {
    let centre = |x: ArrayView1<'_, f64>| -> Array1<f64> {
        let mean = x.mean().unwrap_or(0.0);
        x.mapv(|v| v - mean)
    };
    let sig = centre(signal);
    let reference = centre(reference);

    let correlation = correlate_full(sig.view(), reference.view());
    let Some(best) = argmax(correlation.view()) else {
        return (0.0, 0);
    };
    let lag = best as i64 - (reference.len() as i64 - 1);

    let norm = (sig.dot(&sig) * reference.dot(&reference)).sqrt();
    if norm == 0.0 {
        return (0.0, lag);
    }
    (correlation[best] / norm, lag)
}

/// Correlate `green` with a square wave of its own estimated period.
///
/// # Errors
///
/// [`Reason::NoFramesProcessed`] for an empty signal, [`Reason::SignalFlat`]
/// when the signal has no variation and [`Reason::InsufficientPeaks`] when
/// fewer than two peaks are found.
pub fn check_reference_correlation(
    green: ArrayView1<'_, f64>,
    config: &ReferenceConfig,
) -> Result<ReferenceAnalysis, Reason> {
    if green.is_empty() {
        return Err(Reason::NoFramesProcessed);
    }
    let normalized = normalize_unit(green).ok_or(Reason::SignalFlat)?;

    let peaks = find_peaks(
        normalized.view(),
        &PeakParams {
            prominence: Some(config.prominence),
            distance: Some(config.peak_distance),
            ..Default::default()
        },
    );
    if peaks.len() < 2 {
        tracing::debug!(peaks = peaks.len(), "too few peaks for a period estimate");
        return Err(Reason::InsufficientPeaks);
    }

    let avg_period = (peaks[peaks.len() - 1] - peaks[0]) as f64 / (peaks.len() - 1) as f64;
    let reference = square_wave(normalized.len(), avg_period);
    let (max_corr, lag) = normalized_cross_correlation(normalized.view(), reference.view());

    tracing::debug!(
        peaks = peaks.len(),
        avg_period,
        max_corr,
        lag,
        "reference correlation"
    );

    Ok(ReferenceAnalysis {
        verified: max_corr > config.min_correlation,
        peaks,
        avg_period,
        max_corr,
        lag,
    })
}
