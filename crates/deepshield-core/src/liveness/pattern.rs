//! Multi-colour matching: did the face reflect each colour of the issued
//! challenge?
//!
//! Each flash shows up as a sudden positive step in the matching channel, so
//! peaks are searched in the first-difference signal rather than the raw one.
//! A glare guard runs first: a phone or monitor held up to the camera shows
//! near-saturated specular highlights that live skin rarely produces.

use crate::challenge::ChallengePattern;
use crate::dsp::{find_peaks, PeakParams};
use crate::signal::{Channel, Signal};
use crate::verdict::{Reason, Verdict};
use serde::{Deserialize, Serialize};

/// Fraction of ROI pixels above the glare threshold that marks a frame as glared.
pub const DEFAULT_GLARE_FRAME_FRACTION: f64 = 0.02;
/// Highest tolerated share of glared frames among frames with a face.
pub const DEFAULT_MAX_GLARE_RATIO: f64 = 0.10;
/// Minimum frame-to-frame intensity jump counted as a flash response.
pub const DEFAULT_PEAK_HEIGHT: f64 = 5.0;
/// Minimum spacing, in samples, between counted responses.
pub const DEFAULT_PEAK_DISTANCE: usize = 5;

pub const FULL_MATCH_CONFIDENCE: f64 = 0.95;
pub const PARTIAL_MATCH_CONFIDENCE: f64 = 0.60;
pub const MISMATCH_CONFIDENCE: f64 = 0.10;
/// Match ratio above which a partial match is still accepted.
pub const PARTIAL_MATCH_RATIO: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PatternConfig {
    pub glare_frame_fraction: f64,
    pub max_glare_ratio: f64,
    pub peak_height: f64,
    pub peak_distance: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            glare_frame_fraction: DEFAULT_GLARE_FRAME_FRACTION,
            max_glare_ratio: DEFAULT_MAX_GLARE_RATIO,
            peak_height: DEFAULT_PEAK_HEIGHT,
            peak_distance: DEFAULT_PEAK_DISTANCE,
        }
    }
}

/// Face and glare frame counts over every processed frame of a clip.
///
/// A face frame whose ROI came out empty still counts toward
/// `frames_with_face`; it just cannot be glared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlareTally {
    pub frames_with_face: usize,
    pub frames_with_glare: usize,
}

impl GlareTally {
    /// `frames_with_glare / frames_with_face`; `None` without face frames.
    pub fn ratio(&self) -> Option<f64> {
        (self.frames_with_face > 0)
            .then(|| self.frames_with_glare as f64 / self.frames_with_face as f64)
    }
}

/// Number of detected responses per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelPeaks {
    pub red: usize,
    pub green: usize,
    pub blue: usize,
}

impl ChannelPeaks {
    pub fn count(&self, channel: Channel) -> usize {
        match channel {
            Channel::Red => self.red,
            Channel::Green => self.green,
            Channel::Blue => self.blue,
        }
    }

    pub fn has(&self, channel: Channel) -> bool {
        self.count(channel) > 0
    }
}

/// Peak counts of each channel's first-difference signal.
pub fn detect_channel_peaks(signal: &Signal, config: &PatternConfig) -> ChannelPeaks {
    let params = PeakParams {
        height: Some(config.peak_height),
        distance: Some(config.peak_distance),
        ..Default::default()
    };
    let count = |channel| find_peaks(signal.deltas(channel).view(), &params).len();

    ChannelPeaks {
        red: count(Channel::Red),
        green: count(Channel::Green),
        blue: count(Channel::Blue),
    }
}

/// How much of a challenge the observed responses cover.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternMatch {
    /// Distinct challenge colours with a response.
    pub score: usize,
    /// Distinct colours in the challenge.
    pub unique_colors: usize,
    pub match_ratio: f64,
}

/// Score `peaks` against the distinct colours of `pattern`. Colours without a
/// camera channel count toward the pattern size but can never score.
pub fn match_pattern(peaks: &ChannelPeaks, pattern: &ChallengePattern) -> PatternMatch {
    let unique = pattern.unique_colors();
    let score = unique
        .iter()
        .filter(|color| color.channel().is_some_and(|c| peaks.has(c)))
        .count();

    PatternMatch {
        score,
        unique_colors: unique.len(),
        match_ratio: score as f64 / unique.len() as f64,
    }
}

/// Decision table over the match ratio.
pub fn decide(match_ratio: f64) -> Verdict {
    if match_ratio >= 1.0 {
        Verdict::new(true, FULL_MATCH_CONFIDENCE, Reason::LivenessVerified)
    } else if match_ratio > PARTIAL_MATCH_RATIO {
        Verdict::new(true, PARTIAL_MATCH_CONFIDENCE, Reason::PartialMatch)
    } else {
        Verdict::new(false, MISMATCH_CONFIDENCE, Reason::ColorMismatch)
    }
}

/// Verify that the face responded to the colours of `pattern`.
///
/// Checks, in order: at least one face frame, the glare ratio, then the
/// per-channel responses.
pub fn check_pattern_response(
    signal: &Signal,
    tally: &GlareTally,
    pattern: &ChallengePattern,
    config: &PatternConfig,
) -> Verdict {
    let Some(glare_ratio) = tally.ratio() else {
        return Verdict::rejected(Reason::NoFaceDetected);
    };
    if glare_ratio > config.max_glare_ratio {
        tracing::info!(
            glare_ratio,
            frames_with_glare = tally.frames_with_glare,
            frames_with_face = tally.frames_with_face,
            "glare guard tripped"
        );
        return Verdict::rejected(Reason::ExcessiveGlare);
    }

    let peaks = detect_channel_peaks(signal, config);
    let matched = match_pattern(&peaks, pattern);
    tracing::debug!(
        red = peaks.red,
        green = peaks.green,
        blue = peaks.blue,
        score = matched.score,
        unique_colors = matched.unique_colors,
        "channel responses matched"
    );

    decide(matched.match_ratio)
}
