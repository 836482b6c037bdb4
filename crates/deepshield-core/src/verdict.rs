//! The verdict record returned by every verification.

use serde::{Serialize, Serializer};
use std::fmt;

/// Why a verdict came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    VideoNotFound,
    VideoOpenFailed,
    InvalidRequest,
    DetectorInitFailed,
    NoFramesProcessed,
    NoFaceDetected,
    NoFramesAfterFlash,
    SignalFlat,
    InsufficientPeaks,
    ExcessiveGlare,
    NoFlashResponse,
    ColorMismatch,
    PatternMismatch,
    PartialMatch,
    LivenessVerified,
}

/// Coarse grouping of [`Reason`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonKind {
    /// Missing or unreadable input; not worth retrying as-is.
    Input,
    /// Face detector could not be initialised at startup.
    DetectorUnavailable,
    /// The clip carried no usable signal.
    NoSignal,
    /// A measured quantity missed its bound: the expected spoof outcome.
    ThresholdFailure,
    Verified,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::VideoNotFound => "Video file not found.",
            Reason::VideoOpenFailed => "Error opening video file.",
            Reason::InvalidRequest => "Invalid Verification Request",
            Reason::DetectorInitFailed => "Face Detector Initialization Failed",
            Reason::NoFramesProcessed => "No frames processed.",
            Reason::NoFaceDetected => "No Face Detected",
            Reason::NoFramesAfterFlash => "No frames found after flash offset",
            Reason::SignalFlat => "Signal is flat",
            Reason::InsufficientPeaks => "Not enough peaks to estimate frequency",
            Reason::ExcessiveGlare => "Excessive Glare Detected (Potential Replay Attack)",
            Reason::NoFlashResponse => "Spoof Detected or No Flash Response",
            Reason::ColorMismatch => "Invalid Reflection Profile (Color Mismatch)",
            Reason::PatternMismatch => "Spoof Detected: Signal does not match Screen Pattern",
            Reason::PartialMatch => "Partial Match (Low Confidence)",
            Reason::LivenessVerified => "Liveness Verified",
        }
    }

    pub fn kind(&self) -> ReasonKind {
        match self {
            Reason::VideoNotFound | Reason::VideoOpenFailed | Reason::InvalidRequest => {
                ReasonKind::Input
            }
            Reason::DetectorInitFailed => ReasonKind::DetectorUnavailable,
            Reason::NoFramesProcessed
            | Reason::NoFaceDetected
            | Reason::NoFramesAfterFlash
            | Reason::SignalFlat
            | Reason::InsufficientPeaks => ReasonKind::NoSignal,
            Reason::ExcessiveGlare
            | Reason::NoFlashResponse
            | Reason::ColorMismatch
            | Reason::PatternMismatch => ReasonKind::ThresholdFailure,
            Reason::PartialMatch | Reason::LivenessVerified => ReasonKind::Verified,
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Reason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Strategy-specific measurements. Each field is set only by the strategy
/// that measures it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    /// Lag (samples) of best alignment with the synthetic reference. Not used
    /// by the decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lag: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation: Option<f64>,
}

/// Outcome of one verification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub verified: bool,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    pub reason: Reason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
}

impl Verdict {
    pub fn new(verified: bool, confidence: f64, reason: Reason) -> Self {
        Self {
            verified,
            confidence: confidence.clamp(0.0, 1.0),
            reason,
            diagnostics: None,
        }
    }

    /// Negative verdict with zero confidence and no measurements.
    pub fn rejected(reason: Reason) -> Self {
        Self::new(false, 0.0, reason)
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn message(&self) -> &'static str {
        self.reason.as_str()
    }

    /// Flat `{is_liveness_verified, latency_ms, delta, message}` record used by
    /// flash-offset clients.
    pub fn to_flash_report(&self) -> FlashReport {
        let diag = self.diagnostics.unwrap_or_default();
        FlashReport {
            is_liveness_verified: self.verified,
            latency_ms: diag.latency_ms.unwrap_or(0.0),
            delta: diag.delta.unwrap_or(0.0),
            message: self.message().to_string(),
        }
    }

    /// Flat `{is_real, confidence, reason}` record used by challenge-pattern clients.
    pub fn to_pattern_report(&self) -> PatternReport {
        PatternReport {
            is_real: self.verified,
            confidence: self.confidence,
            reason: self.message().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlashReport {
    pub is_liveness_verified: bool,
    pub latency_ms: f64,
    pub delta: f64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternReport {
    pub is_real: bool,
    pub confidence: f64,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Reason; 15] = [
        Reason::VideoNotFound,
        Reason::VideoOpenFailed,
        Reason::InvalidRequest,
        Reason::DetectorInitFailed,
        Reason::NoFramesProcessed,
        Reason::NoFaceDetected,
        Reason::NoFramesAfterFlash,
        Reason::SignalFlat,
        Reason::InsufficientPeaks,
        Reason::ExcessiveGlare,
        Reason::NoFlashResponse,
        Reason::ColorMismatch,
        Reason::PatternMismatch,
        Reason::PartialMatch,
        Reason::LivenessVerified,
    ];

    #[test]
    fn reasons_are_never_empty() {
        for reason in ALL {
            assert!(!reason.as_str().is_empty(), "{reason:?}");
        }
    }

    #[test]
    fn only_verified_kinds_accompany_success() {
        for reason in ALL {
            let verified = matches!(reason, Reason::PartialMatch | Reason::LivenessVerified);
            assert_eq!(reason.kind() == ReasonKind::Verified, verified);
        }
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(Verdict::new(true, 1.7, Reason::LivenessVerified).confidence, 1.0);
        assert_eq!(Verdict::new(false, -0.2, Reason::PatternMismatch).confidence, 0.0);
    }

    #[test]
    fn serializes_reason_text_and_skips_absent_fields() {
        let v = Verdict::rejected(Reason::SignalFlat);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["reason"], "Signal is flat");
        assert!(json.get("diagnostics").is_none());

        let v = Verdict::new(true, 0.8, Reason::LivenessVerified).with_diagnostics(Diagnostics {
            lag: Some(-3),
            correlation: Some(0.8),
            ..Default::default()
        });
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["diagnostics"]["lag"], -3);
        assert!(json["diagnostics"].get("delta").is_none());
    }

    #[test]
    fn flash_report_defaults_missing_measurements() {
        let report = Verdict::rejected(Reason::NoFramesProcessed).to_flash_report();
        assert_eq!(
            report,
            FlashReport {
                is_liveness_verified: false,
                latency_ms: 0.0,
                delta: 0.0,
                message: "No frames processed.".into(),
            }
        );
    }

    #[test]
    fn pattern_report_carries_confidence() {
        let report = Verdict::new(true, 0.6, Reason::PartialMatch).to_pattern_report();
        assert!(report.is_real);
        assert_eq!(report.confidence, 0.6);
        assert_eq!(report.reason, "Partial Match (Low Confidence)");
    }
}
