//! One clip in, one verdict out.
//!
//! The engine decodes frames through a caller-supplied capability, locates the
//! face, samples the ROI the selected strategy needs and hands the assembled
//! signal to exactly one strategy. Nothing is retained between calls: each
//! verification builds its own locator and owns its decoder handle until it
//! returns.

use crate::challenge::ChallengePattern;
use crate::config::EngineConfig;
use crate::detector::{DetectorError, FaceLocator, LocatorFactory, ScrfdModel};
use crate::frame::{FrameDecoder, FrameSource, SourceError};
use crate::liveness::{
    check_flash_response, check_pattern_response, check_reference_correlation, GlareTally,
};
use crate::roi::{extract_roi_stats, RoiRule};
use crate::signal::{Channel, Signal, SignalAssembler};
use crate::verdict::{Reason, Verdict};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModeError {
    #[error("a flash offset and a challenge pattern cannot be combined")]
    Ambiguous,
    #[error("flash offset must be a finite number of milliseconds, got {0}")]
    InvalidOffset(f64),
}

impl ModeError {
    pub fn reason(&self) -> Reason {
        Reason::InvalidRequest
    }
}

/// Which strategy judges the clip.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationMode {
    /// Forehead red response to a single flash starting at `offset_ms`.
    Flash { offset_ms: f64 },
    /// Per-channel responses to an issued colour challenge.
    Pattern(ChallengePattern),
    /// Green-channel correlation with a self-derived square wave.
    Reference,
}

impl VerificationMode {
    /// Mode for a request carrying an optional flash offset and an optional
    /// challenge. With neither, the reference strategy is used.
    pub fn select(
        flash_offset_ms: Option<f64>,
        challenge: Option<ChallengePattern>,
    ) -> Result<Self, ModeError> {
        match (flash_offset_ms, challenge) {
            (Some(_), Some(_)) => Err(ModeError::Ambiguous),
            (Some(offset), None) if !offset.is_finite() => Err(ModeError::InvalidOffset(offset)),
            (Some(offset_ms), None) => Ok(VerificationMode::Flash { offset_ms }),
            (None, Some(pattern)) => Ok(VerificationMode::Pattern(pattern)),
            (None, None) => Ok(VerificationMode::Reference),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VerificationMode::Flash { .. } => "flash",
            VerificationMode::Pattern(_) => "pattern",
            VerificationMode::Reference => "reference",
        }
    }

    pub fn roi_rule(&self, config: &EngineConfig) -> RoiRule {
        match self {
            VerificationMode::Flash { .. } => RoiRule::Forehead,
            VerificationMode::Pattern(_) => RoiRule::FaceCenter,
            VerificationMode::Reference => RoiRule::FrameCenter {
                size: config.center_roi_size,
            },
        }
    }

    fn measures_glare(&self) -> bool {
        matches!(self, VerificationMode::Pattern(_))
    }
}

/// Signal captured from one clip, before any strategy has looked at it.
#[derive(Debug, Clone)]
pub struct Capture {
    pub signal: Signal,
    pub fps: f64,
    pub frames_decoded: usize,
    /// Frames in which the locator found at least one face.
    pub frames_with_face: usize,
    /// Face frames whose ROI glare fraction exceeded the pattern limit.
    /// Only counted in pattern mode.
    pub frames_with_glare: usize,
}

pub struct Engine {
    config: EngineConfig,
    locators: Result<Box<dyn LocatorFactory>, DetectorError>,
}

impl Engine {
    /// Engine over an already-resolved detector. A detector failure is kept
    /// and reported as [`Reason::DetectorInitFailed`] by every verification
    /// that needs a face.
    pub fn new(
        config: EngineConfig,
        locators: Result<Box<dyn LocatorFactory>, DetectorError>,
    ) -> Self {
        match &locators {
            Ok(_) => tracing::info!("face detector ready"),
            Err(e) => tracing::error!(error = %e, "face detector initialization failed"),
        }
        Self { config, locators }
    }

    /// Engine using the SCRFD detector resolved from `model_dir` (or the
    /// relative fallback directory).
    pub fn with_scrfd(config: EngineConfig, model_dir: Option<&Path>) -> Self {
        let locators = ScrfdModel::resolve(model_dir, config.detector.clone())
            .map(|model| Box::new(model) as Box<dyn LocatorFactory>);
        Self::new(config, locators)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn detector_error(&self) -> Option<&DetectorError> {
        self.locators.as_ref().err()
    }

    /// Open `path` with `decoder` and verify the clip.
    pub fn verify_file<D: FrameDecoder>(
        &self,
        decoder: &D,
        path: &Path,
        mode: &VerificationMode,
    ) -> Verdict {
        let _span = tracing::info_span!("verify", mode = mode.name()).entered();
        let verdict = match self.capture_file(decoder, path, mode) {
            Ok(capture) => self.analyze(&capture, mode),
            Err(reason) => Verdict::rejected(reason),
        };
        log_verdict(&verdict);
        verdict
    }

    /// Verify frames from an already-open source. The source is consumed and
    /// dropped before returning.
    pub fn verify_source<S: FrameSource>(&self, mut source: S, mode: &VerificationMode) -> Verdict {
        let _span = tracing::info_span!("verify", mode = mode.name()).entered();
        let captured = self.capture(&mut source, mode);
        drop(source);
        let verdict = match captured {
            Ok(capture) => self.analyze(&capture, mode),
            Err(reason) => Verdict::rejected(reason),
        };
        log_verdict(&verdict);
        verdict
    }

    /// Open `path` and capture its signal for `mode`.
    pub fn capture_file<D: FrameDecoder>(
        &self,
        decoder: &D,
        path: &Path,
        mode: &VerificationMode,
    ) -> Result<Capture, Reason> {
        let mut source = decoder.open(path).map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "cannot open clip");
            match e {
                SourceError::NotFound(_) => Reason::VideoNotFound,
                _ => Reason::VideoOpenFailed,
            }
        })?;
        self.capture(&mut source, mode)
    }

    /// Read `source` to the end and assemble the signal `mode` needs.
    ///
    /// Frames without a face, or whose ROI is empty, contribute no sample. A
    /// decode error ends the clip early; frames read so far are kept. A
    /// locator that cannot be built or fails mid-clip rejects the clip as
    /// [`Reason::DetectorInitFailed`].
    pub fn capture<S: FrameSource>(
        &self,
        source: &mut S,
        mode: &VerificationMode,
    ) -> Result<Capture, Reason> {
        let rule = mode.roi_rule(&self.config);
        let mut locator: Option<Box<dyn FaceLocator>> = if rule.needs_face() {
            let factory = self
                .locators
                .as_ref()
                .map_err(|_| Reason::DetectorInitFailed)?;
            match factory.build() {
                Ok(locator) => Some(locator),
                Err(e) => {
                    tracing::error!(error = %e, "cannot build face locator");
                    return Err(Reason::DetectorInitFailed);
                }
            }
        } else {
            None
        };
        let glare_threshold = mode
            .measures_glare()
            .then_some(self.config.glare_pixel_threshold);
        let glare_frame_fraction = self.config.pattern.glare_frame_fraction;

        let fps = self.config.effective_fps(source.fps());
        let mut assembler = SignalAssembler::new(fps);
        let mut frames_decoded = 0usize;
        let mut frames_with_face = 0usize;
        let mut frames_with_glare = 0usize;

        loop {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, frames = frames_decoded, "decode failed, ending clip");
                    break;
                }
            };
            frames_decoded += 1;

            let face = match locator.as_mut() {
                Some(locator) => {
                    let faces = locator.locate(&frame.image).map_err(|e| {
                        tracing::error!(frame = frame.index, error = %e, "face detection failed");
                        Reason::DetectorInitFailed
                    })?;
                    match faces.into_iter().next() {
                        Some(face) => {
                            frames_with_face += 1;
                            Some(face)
                        }
                        None => {
                            tracing::debug!(frame = frame.index, "no face");
                            continue;
                        }
                    }
                }
                None => None,
            };

            let (width, height) = frame.image.dimensions();
            let Some(roi) = rule.resolve(face.as_ref(), width, height) else {
                tracing::debug!(frame = frame.index, "empty ROI, frame skipped");
                continue;
            };
            let Some(stats) = extract_roi_stats(&frame.image, &roi, glare_threshold) else {
                continue;
            };
            if stats.glare_pct.is_some_and(|pct| pct > glare_frame_fraction) {
                frames_with_glare += 1;
            }

            tracing::trace!(
                frame = frame.index,
                red = stats.red,
                green = stats.green,
                blue = stats.blue,
                glare = stats.glare_pct,
                "sample"
            );
            assembler.push(frame.index, frame.timestamp_ms, stats);
        }

        tracing::debug!(
            frames = frames_decoded,
            faces = frames_with_face,
            glare = frames_with_glare,
            samples = assembler.len(),
            fps,
            "clip captured"
        );

        if frames_decoded == 0 {
            return Err(Reason::NoFramesProcessed);
        }
        if rule.needs_face() && frames_with_face == 0 {
            return Err(Reason::NoFaceDetected);
        }

        Ok(Capture {
            signal: assembler.finish(),
            fps,
            frames_decoded,
            frames_with_face,
            frames_with_glare,
        })
    }

    /// Run the strategy of `mode` over a captured signal.
    pub fn analyze(&self, capture: &Capture, mode: &VerificationMode) -> Verdict {
        let signal = &capture.signal;
        match mode {
            VerificationMode::Flash { offset_ms } => check_flash_response(
                signal.channel(Channel::Red).view(),
                signal.timestamps().view(),
                *offset_ms,
                &self.config.flash,
            )
            .map_or_else(Verdict::rejected, |analysis| analysis.verdict()),
            VerificationMode::Pattern(pattern) => {
                let tally = GlareTally {
                    frames_with_face: capture.frames_with_face,
                    frames_with_glare: capture.frames_with_glare,
                };
                check_pattern_response(signal, &tally, pattern, &self.config.pattern)
            }
            VerificationMode::Reference => check_reference_correlation(
                signal.channel(Channel::Green).view(),
                &self.config.reference,
            )
            .map_or_else(Verdict::rejected, |analysis| analysis.verdict()),
        }
    }
}

fn log_verdict(verdict: &Verdict) {
    tracing::info!(
        verified = verdict.verified,
        confidence = verdict.confidence,
        reason = %verdict.reason,
        kind = ?verdict.reason.kind(),
        "verdict"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::FaceBox;
    use crate::frame::{Frame, MemorySource};
    use image::{Rgb, RgbImage};

    struct FixedLocator(Option<FaceBox>);

    impl FaceLocator for FixedLocator {
        fn locate(&mut self, _frame: &RgbImage) -> Result<Vec<FaceBox>, DetectorError> {
            Ok(self.0.into_iter().collect())
        }
    }

    struct FailingLocator;

    impl FaceLocator for FailingLocator {
        fn locate(&mut self, _frame: &RgbImage) -> Result<Vec<FaceBox>, DetectorError> {
            Err(DetectorError::Inference("session lost".into()))
        }
    }

    fn engine_with(face: Option<FaceBox>) -> Engine {
        let factory = move || Box::new(FixedLocator(face)) as Box<dyn FaceLocator>;
        let factory: Box<dyn LocatorFactory> = Box::new(factory);
        Engine::new(EngineConfig::default(), Ok(factory))
    }

    fn broken_engine() -> Engine {
        Engine::new(
            EngineConfig::default(),
            Err(DetectorError::Invalid("no model".into())),
        )
    }

    fn solid(level: u8, n: usize) -> Vec<Frame> {
        (0..n)
            .map(|i| Frame::new(RgbImage::from_pixel(100, 100, Rgb([level; 3])), i, None))
            .collect()
    }

    #[test]
    fn mode_selection() {
        let p: ChallengePattern = "red".parse().unwrap();
        assert_eq!(
            VerificationMode::select(Some(500.0), None),
            Ok(VerificationMode::Flash { offset_ms: 500.0 })
        );
        assert_eq!(
            VerificationMode::select(None, Some(p.clone())),
            Ok(VerificationMode::Pattern(p.clone()))
        );
        assert_eq!(VerificationMode::select(None, None), Ok(VerificationMode::Reference));
        let err = VerificationMode::select(Some(1.0), Some(p)).unwrap_err();
        assert_eq!(err, ModeError::Ambiguous);
        assert_eq!(err.reason(), Reason::InvalidRequest);
        assert!(VerificationMode::select(Some(f64::NAN), None).is_err());
    }

    #[test]
    fn empty_source_is_no_frames() {
        let v = engine_with(None).verify_source(
            MemorySource::default(),
            &VerificationMode::Flash { offset_ms: 500.0 },
        );
        assert_eq!(v, Verdict::rejected(Reason::NoFramesProcessed));
    }

    #[test]
    fn no_face_in_any_frame() {
        let v = engine_with(None).verify_source(
            MemorySource::new(solid(100, 10), Some(30.0)),
            &VerificationMode::Flash { offset_ms: 100.0 },
        );
        assert_eq!(v.reason, Reason::NoFaceDetected);
    }

    #[test]
    fn detector_failure_only_affects_face_modes() {
        let engine = broken_engine();
        assert!(engine.detector_error().is_some());

        let v = engine.verify_source(
            MemorySource::new(solid(100, 10), None),
            &VerificationMode::Pattern("red".parse().unwrap()),
        );
        assert_eq!(v.reason, Reason::DetectorInitFailed);

        let v = engine.verify_source(
            MemorySource::new(solid(100, 10), None),
            &VerificationMode::Reference,
        );
        assert_eq!(v.reason, Reason::SignalFlat);
    }

    #[test]
    fn capture_counts_frames_and_faces() {
        let engine = engine_with(Some(FaceBox::new(20, 20, 60, 60)));
        let mut source = MemorySource::new(solid(90, 12), Some(0.0));
        let capture = engine
            .capture(&mut source, &VerificationMode::Flash { offset_ms: 0.0 })
            .unwrap();
        assert_eq!(capture.frames_decoded, 12);
        assert_eq!(capture.frames_with_face, 12);
        assert_eq!(capture.signal.len(), 12);
        assert_eq!(capture.fps, 30.0);
        assert_eq!(capture.signal.samples()[3].timestamp_ms, 100.0);
    }

    #[test]
    fn face_outside_frame_yields_no_samples() {
        let engine = engine_with(Some(FaceBox::new(500, 500, 60, 60)));
        let mut source = MemorySource::new(solid(90, 5), None);
        let capture = engine
            .capture(&mut source, &VerificationMode::Flash { offset_ms: 0.0 })
            .unwrap();
        assert_eq!(capture.frames_with_face, 5);
        assert!(capture.signal.is_empty());
    }

    /// Finds the face in frame for the first `visible` calls, then reports it
    /// past the frame edge so its ROI comes out empty.
    struct DriftingLocator {
        visible: usize,
        calls: usize,
    }

    impl FaceLocator for DriftingLocator {
        fn locate(&mut self, _frame: &RgbImage) -> Result<Vec<FaceBox>, DetectorError> {
            self.calls += 1;
            let face = if self.calls <= self.visible {
                FaceBox::new(20, 20, 60, 60)
            } else {
                FaceBox::new(400, 400, 60, 60)
            };
            Ok(vec![face])
        }
    }

    #[test]
    fn glare_ratio_counts_every_face_frame() {
        let factory = || {
            Box::new(DriftingLocator {
                visible: 2,
                calls: 0,
            }) as Box<dyn FaceLocator>
        };
        let factory: Box<dyn LocatorFactory> = Box::new(factory);
        let engine = Engine::new(EngineConfig::default(), Ok(factory));
        let mode = VerificationMode::Pattern("red".parse().unwrap());

        // every pixel is saturated, but only two face frames have a ROI
        let mut source = MemorySource::new(solid(255, 30), None);
        let capture = engine.capture(&mut source, &mode).unwrap();
        assert_eq!(capture.frames_with_face, 30);
        assert_eq!(capture.frames_with_glare, 2);
        assert_eq!(capture.signal.len(), 2);

        // 2 / 30 stays under the 10% limit
        let v = engine.analyze(&capture, &mode);
        assert_ne!(v.reason, Reason::ExcessiveGlare);
        assert_eq!(v.reason, Reason::ColorMismatch);
    }

    #[test]
    fn glare_is_only_counted_in_pattern_mode() {
        let engine = engine_with(Some(FaceBox::new(20, 20, 60, 60)));
        let mut source = MemorySource::new(solid(255, 10), None);
        let capture = engine
            .capture(&mut source, &VerificationMode::Flash { offset_ms: 0.0 })
            .unwrap();
        assert_eq!(capture.frames_with_glare, 0);
    }

    #[test]
    fn locator_failure_rejects_clip() {
        let factory = || Box::new(FailingLocator) as Box<dyn FaceLocator>;
        let factory: Box<dyn LocatorFactory> = Box::new(factory);
        let engine = Engine::new(EngineConfig::default(), Ok(factory));
        let v = engine.verify_source(
            MemorySource::new(solid(100, 5), None),
            &VerificationMode::Pattern("red".parse().unwrap()),
        );
        assert_eq!(v, Verdict::rejected(Reason::DetectorInitFailed));
    }

    #[test]
    fn missing_clip_is_not_found() {
        let path = std::env::temp_dir().join("deepshield-missing-clip-dir");
        let v = engine_with(None).verify_file(
            &crate::frame::ImageSequenceDecoder::default(),
            &path,
            &VerificationMode::Reference,
        );
        assert_eq!(v, Verdict::rejected(Reason::VideoNotFound));
    }
}
