//! Flash response: did the forehead redden, soon enough, after the red flash?

use crate::dsp::argmax;
use crate::verdict::{Diagnostics, Reason, Verdict};
use ndarray::{s, ArrayView1};
use serde::{Deserialize, Serialize};

/// Minimum rise in mean red intensity recognised as a reflection. Skin under
/// a full-screen red flash rises well above camera noise (~1 level).
pub const DEFAULT_DELTA_THRESHOLD: f64 = 3.0;

/// Longest accepted delay between flash onset and peak response, covering
/// display, capture and encode delays.
pub const DEFAULT_MAX_LATENCY_MS: f64 = 1200.0;

/// Divisor selecting the leading samples used as baseline when no sample
/// precedes the flash.
const BASELINE_FALLBACK_DIVISOR: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlashConfig {
    pub delta_threshold: f64,
    pub max_latency_ms: f64,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            delta_threshold: DEFAULT_DELTA_THRESHOLD,
            max_latency_ms: DEFAULT_MAX_LATENCY_MS,
        }
    }
}

/// Measurements of a flash-response check.
#[derive(Debug, Clone, PartialEq)]
pub struct FlashAnalysis {
    pub verified: bool,
    pub baseline: f64,
    pub peak: f64,
    pub peak_timestamp_ms: f64,
    /// `peak - baseline`.
    pub delta: f64,
    /// `peak_timestamp_ms - flash_offset_ms`.
    pub latency_ms: f64,
}

impl FlashAnalysis {
    pub fn verdict(&self) -> Verdict {
        let (confidence, reason) = if self.verified {
            (1.0, Reason::LivenessVerified)
        } else {
            (0.0, Reason::NoFlashResponse)
        };
        Verdict::new(self.verified, confidence, reason).with_diagnostics(Diagnostics {
            delta: Some(self.delta),
            latency_ms: Some(self.latency_ms),
            ..Default::default()
        })
    }
}

/// Compare red intensity before and after `flash_offset_ms`.
///
/// `red` and `timestamps_ms` are parallel, timestamp-ordered arrays.
/// The baseline is the mean of samples before the flash, or of the first
/// tenth of the clip when the flash starts before the first sample.
///
/// # Errors
///
/// [`Reason::NoFramesProcessed`] for an empty signal and
/// [`Reason::NoFramesAfterFlash`] when every sample precedes the flash.
pub fn check_flash_response(
    red: ArrayView1<'_, f64>,
    timestamps_ms: ArrayView1<'_, f64>,
    flash_offset_ms: f64,
    config: &FlashConfig,
) -> Result<FlashAnalysis, Reason> {
    if red.is_empty() {
        return Err(Reason::NoFramesProcessed);
    }

    let (mut pre_sum, mut pre_count) = (0.0, 0usize);
    let mut post_values = Vec::new();
    let mut post_times = Vec::new();
    for (&value, &ts) in red.iter().zip(timestamps_ms.iter()) {
        if ts < flash_offset_ms {
            pre_sum += value;
            pre_count += 1;
        } else {
            post_values.push(value);
            post_times.push(ts);
        }
    }

    let baseline = if pre_count > 0 {
        pre_sum / pre_count as f64
    } else {
        let head = (red.len() / BASELINE_FALLBACK_DIVISOR).max(1);
        red.slice(s![..head]).sum() / head as f64
    };

    let post = ArrayView1::from(&post_values[..]);
    let Some(peak_idx) = argmax(post) else {
        return Err(Reason::NoFramesAfterFlash);
    };
    let peak = post_values[peak_idx];
    let peak_timestamp_ms = post_times[peak_idx];

    let delta = peak - baseline;
    let latency_ms = peak_timestamp_ms - flash_offset_ms;
    let verified = delta > config.delta_threshold
        && (0.0..=config.max_latency_ms).contains(&latency_ms);

    Ok(FlashAnalysis {
        verified,
        baseline,
        peak,
        peak_timestamp_ms,
        delta,
        latency_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn check(red: &[f64], ts: &[f64], offset: f64) -> Result<FlashAnalysis, Reason> {
        check_flash_response(
            ArrayView1::from(red),
            ArrayView1::from(ts),
            offset,
            &FlashConfig::default(),
        )
    }

    #[test]
    fn reddening_after_flash_is_verified() {
        let red = [99.0, 101.0, 100.0, 104.0, 110.0, 106.0];
        let ts = [0.0, 200.0, 400.0, 600.0, 700.0, 800.0];
        let a = check(&red, &ts, 500.0).unwrap();

        assert_eq!(a.baseline, 100.0);
        assert_eq!(a.peak, 110.0);
        assert_eq!(a.delta, 10.0);
        assert_eq!(a.latency_ms, 200.0);
        assert!(a.verified);
    }

    #[test]
    fn small_delta_is_rejected() {
        let red = [100.0, 100.0, 102.0, 101.0];
        let ts = [0.0, 400.0, 600.0, 700.0];
        let a = check(&red, &ts, 500.0).unwrap();
        assert_eq!(a.delta, 2.0);
        assert!(!a.verified);
        assert_eq!(a.verdict().reason, Reason::NoFlashResponse);
    }

    #[test]
    fn delta_exactly_at_threshold_is_rejected() {
        let red = [100.0, 103.0];
        let ts = [0.0, 600.0];
        assert!(!check(&red, &ts, 500.0).unwrap().verified);
    }

    #[test]
    fn late_peak_is_rejected() {
        let red = [100.0, 100.0, 101.0, 120.0];
        let ts = [0.0, 400.0, 600.0, 1800.0];
        let a = check(&red, &ts, 500.0).unwrap();
        assert_eq!(a.latency_ms, 1300.0);
        assert!(!a.verified);
    }

    #[test]
    fn latency_bound_is_inclusive() {
        let red = [100.0, 110.0];
        let ts = [0.0, 1700.0];
        let a = check(&red, &ts, 500.0).unwrap();
        assert_eq!(a.latency_ms, 1200.0);
        assert!(a.verified);
    }

    #[test]
    fn first_peak_wins_ties() {
        let red = [100.0, 108.0, 108.0];
        let ts = [0.0, 600.0, 900.0];
        assert_eq!(check(&red, &ts, 500.0).unwrap().peak_timestamp_ms, 600.0);
    }

    #[test]
    fn baseline_falls_back_to_leading_tenth() {
        // Flash at t=0: nothing precedes it. 20 samples -> first 2 are the baseline.
        let mut red = vec![90.0, 92.0];
        red.extend(std::iter::repeat(95.0).take(18));
        let ts: Vec<f64> = (0..20).map(|i| i as f64 * 50.0).collect();
        let a = check(&red, &ts, 0.0).unwrap();
        assert_eq!(a.baseline, 91.0);
        assert_eq!(a.delta, 4.0);
        assert_eq!(a.latency_ms, 100.0);
        assert!(a.verified);
    }

    #[test]
    fn short_clip_baseline_uses_first_sample() {
        let a = check(&[100.0, 105.0, 104.0], &[10.0, 20.0, 30.0], 0.0).unwrap();
        assert_eq!(a.baseline, 100.0);
    }

    #[test]
    fn no_samples_after_flash() {
        let err = check(&[100.0, 101.0], &[0.0, 100.0], 500.0).unwrap_err();
        assert_eq!(err, Reason::NoFramesAfterFlash);
    }

    #[test]
    fn empty_signal() {
        assert_eq!(check(&[], &[], 500.0).unwrap_err(), Reason::NoFramesProcessed);
    }

    #[test]
    fn verdict_carries_measurements() {
        let red = array![100.0, 110.0];
        let ts = array![0.0, 700.0];
        let v = check_flash_response(red.view(), ts.view(), 500.0, &FlashConfig::default())
            .unwrap()
            .verdict();
        assert!(v.verified);
        assert_eq!(v.confidence, 1.0);
        let d = v.diagnostics.unwrap();
        assert_eq!(d.delta, Some(10.0));
        assert_eq!(d.latency_ms, Some(200.0));
        assert_eq!(d.lag, None);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let red = [97.3, 101.9, 100.2, 111.7, 104.4];
        let ts = [0.0, 166.6, 333.3, 633.3, 833.3];
        assert_eq!(check(&red, &ts, 480.0), check(&red, &ts, 480.0));
    }
}
