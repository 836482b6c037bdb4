//! Face location.
//!
//! [`FaceLocator`] is the capability the engine depends on; anything that can
//! turn a frame into face boxes plugs in here. The crate ships one backend,
//! [`ScrfdLocator`], which runs the SCRFD-10GF ONNX detector through `ort`.
//! The model is resolved and checksummed once, when the engine starts, and
//! any problem with it surfaces then as a [`DetectorError`].
//!
//! Frames reach the network as contrast-stretched luma replicated over the
//! three input planes. The challenge flashes tint the whole face one colour at
//! a time; with chroma removed the detector sees the same face under every
//! flash.

use deepshield_models::{resolve_asset, ModelIntegrityError, SCRFD_DETECTOR};
use image::{imageops, GrayImage, RgbImage};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;
/// Side of the square network input, in pixels.
pub const DEFAULT_INPUT_SIZE: u32 = 640;
/// Faces narrower or shorter than this, in frame pixels, are dropped.
pub const DEFAULT_MIN_FACE_SIZE: u32 = 50;

/// Feature-map strides of the SCRFD heads, in output order.
const STRIDES: [u32; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;
const INPUT_MEAN: f32 = 127.5;
const INPUT_STD: f32 = 128.0;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector asset unavailable: {0}")]
    Asset(#[from] ModelIntegrityError),
    #[error("failed to read detector model {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to load detector model: {0}")]
    Load(String),
    #[error("detector inference failed: {0}")]
    Inference(String),
    #[error("unexpected detector output: {0}")]
    Output(String),
    #[error("invalid detector config: {0}")]
    Invalid(String),
}

fn load_error(e: impl Display) -> DetectorError {
    DetectorError::Load(e.to_string())
}

fn inference_error(e: impl Display) -> DetectorError {
    DetectorError::Inference(e.to_string())
}

/// Axis-aligned face bounding box in frame pixels.
///
/// Boxes may extend past the frame edge; ROI resolution clips them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Order boxes largest area first. Equal areas keep their detection order.
pub fn sort_largest_first(faces: &mut [FaceBox]) {
    faces.sort_by(|a, b| b.area().cmp(&a.area()));
}

/// Locates faces in a single frame.
pub trait FaceLocator {
    /// Faces in `frame`, largest area first; empty when none are found.
    fn locate(&mut self, frame: &RgbImage) -> Result<Vec<FaceBox>, DetectorError>;
}

/// Builds one [`FaceLocator`] per verification.
///
/// Locators may keep scratch state between frames, so concurrent
/// verifications never share an instance.
pub trait LocatorFactory: Send + Sync {
    fn build(&self) -> Result<Box<dyn FaceLocator>, DetectorError>;
}

impl<F> LocatorFactory for F
where
    F: Fn() -> Box<dyn FaceLocator> + Send + Sync,
{
    fn build(&self) -> Result<Box<dyn FaceLocator>, DetectorError> {
        Ok(self())
    }
}

/// SCRFD post-processing thresholds, the `[detector]` table of the engine config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub input_size: u32,
    pub min_face_size: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            input_size: DEFAULT_INPUT_SIZE,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.score_threshold > 0.0 && self.score_threshold < 1.0) {
            return Err("detector.score_threshold must be in (0, 1)".into());
        }
        if !(self.nms_threshold > 0.0 && self.nms_threshold <= 1.0) {
            return Err("detector.nms_threshold must be in (0, 1]".into());
        }
        if self.input_size == 0 || self.input_size % 32 != 0 {
            return Err(format!(
                "detector.input_size must be a positive multiple of 32, got {}",
                self.input_size
            ));
        }
        Ok(())
    }
}

/// Luma of `frame`, linearly stretched to the full 0..=255 range.
///
/// A uniform gain on any channel mix scales luma by a constant, which the
/// stretch removes.
pub fn normalized_luma(frame: &RgbImage) -> GrayImage {
    let mut gray = imageops::grayscale(frame);
    let (lo, hi) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    if hi > lo {
        let span = f32::from(hi - lo);
        for p in gray.pixels_mut() {
            p.0[0] = (f32::from(p.0[0] - lo) * 255.0 / span).round() as u8;
        }
    }
    gray
}

/// Placement of a frame in the square network input: resized to
/// `width` x `height` at the top-left corner, zero padding elsewhere.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    width: u32,
    height: u32,
    /// Input pixels per frame pixel.
    scale: f32,
}

impl Letterbox {
    fn fit(frame_width: u32, frame_height: u32, input_size: u32) -> Self {
        let (width, height) = if frame_height > frame_width {
            let w = u64::from(input_size) * u64::from(frame_width) / u64::from(frame_height);
            (w as u32, input_size)
        } else {
            let h = u64::from(input_size) * u64::from(frame_height) / u64::from(frame_width);
            (input_size, h as u32)
        };
        let (width, height) = (width.max(1), height.max(1));
        Self {
            width,
            height,
            scale: height as f32 / frame_height as f32,
        }
    }
}

fn to_input(v: u8) -> f32 {
    (f32::from(v) - INPUT_MEAN) / INPUT_STD
}

/// NCHW data for one frame, plus where the frame landed inside it.
fn prepare_input(frame: &RgbImage, input_size: u32) -> (Vec<f32>, Letterbox) {
    let fit = Letterbox::fit(frame.width(), frame.height(), input_size);
    let luma = normalized_luma(frame);
    let resized = imageops::resize(&luma, fit.width, fit.height, imageops::FilterType::Triangle);

    let side = input_size as usize;
    let plane = side * side;
    let mut data = vec![to_input(0); plane * 3];
    for (x, y, p) in resized.enumerate_pixels() {
        let v = to_input(p.0[0]);
        let i = y as usize * side + x as usize;
        data[i] = v;
        data[plane + i] = v;
        data[2 * plane + i] = v;
    }
    (data, fit)
}

/// Candidate box in network-input coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Detection {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

impl Detection {
    fn area(&self) -> f32 {
        (self.x2 - self.x1 + 1.0).max(0.0) * (self.y2 - self.y1 + 1.0).max(0.0)
    }

    fn iou(&self, other: &Detection) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1) + 1.0).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1) + 1.0).max(0.0);
        let inter = w * h;
        inter / (self.area() + other.area() - inter)
    }
}

/// Decode one stride level. `scores` holds one value per anchor and
/// `distances` four per anchor (left, top, right, bottom) in stride units.
fn decode_level(
    scores: &[f32],
    distances: &[f32],
    stride: u32,
    input_size: u32,
    threshold: f32,
    out: &mut Vec<Detection>,
) -> Result<(), DetectorError> {
    let cells = (input_size / stride) as usize;
    let anchors = cells * cells * ANCHORS_PER_CELL;
    if scores.len() != anchors || distances.len() != anchors * 4 {
        return Err(DetectorError::Output(format!(
            "stride {stride}: expected {anchors} anchors, got {} scores and {} distances",
            scores.len(),
            distances.len()
        )));
    }

    let s = stride as f32;
    for (k, &score) in scores.iter().enumerate() {
        if score < threshold {
            continue;
        }
        let cell = k / ANCHORS_PER_CELL;
        let cx = (cell % cells) as f32 * s;
        let cy = (cell / cells) as f32 * s;
        let d = &distances[k * 4..k * 4 + 4];
        out.push(Detection {
            x1: cx - d[0] * s,
            y1: cy - d[1] * s,
            x2: cx + d[2] * s,
            y2: cy + d[3] * s,
            score,
        });
    }
    Ok(())
}

/// Greedy NMS, highest score first.
fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for d in detections {
        if kept.iter().all(|k| k.iou(&d) <= iou_threshold) {
            kept.push(d);
        }
    }
    kept
}

fn to_face_box(d: &Detection, fit: &Letterbox) -> FaceBox {
    let x1 = d.x1 / fit.scale;
    let y1 = d.y1 / fit.scale;
    let x2 = d.x2 / fit.scale;
    let y2 = d.y2 / fit.scale;
    FaceBox::new(
        x1.round() as i32,
        y1.round() as i32,
        (x2 - x1).round().max(0.0) as u32,
        (y2 - y1).round().max(0.0) as u32,
    )
}

fn load_session(bytes: &[u8]) -> Result<Session, DetectorError> {
    let builder = Session::builder().map_err(load_error)?;
    let builder = builder
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(load_error)?;
    let builder = builder.with_intra_threads(1).map_err(load_error)?;
    builder.commit_from_memory(bytes).map_err(load_error)
}

/// Verified SCRFD model held in memory; builds one session per locator.
pub struct ScrfdModel {
    bytes: Vec<u8>,
    config: DetectorConfig,
}

impl std::fmt::Debug for ScrfdModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrfdModel")
            .field("bytes", &self.bytes.len())
            .field("config", &self.config)
            .finish()
    }
}

impl ScrfdModel {
    /// Resolve the detector asset (configured directory first, then the
    /// relative fallback), verify its checksum and load it.
    pub fn resolve(model_dir: Option<&Path>, config: DetectorConfig) -> Result<Self, DetectorError> {
        let path = resolve_asset(&SCRFD_DETECTOR, model_dir)?;
        Self::load(&path, config)
    }

    /// Load the model at `path` without a checksum check. One session is
    /// built and dropped so a malformed graph fails here.
    pub fn load(path: &Path, config: DetectorConfig) -> Result<Self, DetectorError> {
        config.validate().map_err(DetectorError::Invalid)?;
        let bytes = std::fs::read(path).map_err(|source| DetectorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        load_session(&bytes)?;
        tracing::info!(path = %path.display(), "SCRFD detector loaded");
        Ok(Self { bytes, config })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }
}

impl LocatorFactory for ScrfdModel {
    fn build(&self) -> Result<Box<dyn FaceLocator>, DetectorError> {
        Ok(Box::new(ScrfdLocator {
            session: load_session(&self.bytes)?,
            config: self.config.clone(),
        }))
    }
}

/// SCRFD face locator.
pub struct ScrfdLocator {
    session: Session,
    config: DetectorConfig,
}

impl FaceLocator for ScrfdLocator {
    fn locate(&mut self, frame: &RgbImage) -> Result<Vec<FaceBox>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }
        let size = self.config.input_size;
        let (data, fit) = prepare_input(frame, size);
        let side = size as usize;
        let input = Tensor::from_array(([1usize, 3, side, side], data)).map_err(inference_error)?;
        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(inference_error)?;
        if outputs.len() < STRIDES.len() * 2 {
            return Err(DetectorError::Output(format!(
                "expected at least {} outputs, got {}",
                STRIDES.len() * 2,
                outputs.len()
            )));
        }

        let mut candidates = Vec::new();
        for (level, stride) in STRIDES.into_iter().enumerate() {
            let (_, scores) = outputs[level]
                .try_extract_tensor::<f32>()
                .map_err(inference_error)?;
            let (_, distances) = outputs[level + STRIDES.len()]
                .try_extract_tensor::<f32>()
                .map_err(inference_error)?;
            decode_level(
                scores,
                distances,
                stride,
                size,
                self.config.score_threshold,
                &mut candidates,
            )?;
        }

        let min = self.config.min_face_size;
        let mut faces: Vec<FaceBox> = non_max_suppression(candidates, self.config.nms_threshold)
            .iter()
            .map(|d| to_face_box(d, &fit))
            .filter(|f| f.width >= min && f.height >= min)
            .collect();
        sort_largest_first(&mut faces);
        tracing::trace!(faces = faces.len(), "SCRFD pass complete");
        Ok(faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Neutral-grey frame with a radial texture, values 40..=220.
    fn textured(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let dx = x as f32 - width as f32 / 2.0;
            let dy = y as f32 - height as f32 / 2.0;
            let r = (dx * dx + dy * dy).sqrt();
            let v = 130.0 + 90.0 * (r / 9.0).sin();
            Rgb([v as u8; 3])
        })
    }

    fn lit(frame: &RgbImage, gains: [f32; 3]) -> RgbImage {
        let mut out = frame.clone();
        for p in out.pixels_mut() {
            for c in 0..3 {
                p.0[c] = (f32::from(p.0[c]) * gains[c]).round() as u8;
            }
        }
        out
    }

    fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
    }

    #[test]
    fn detector_input_does_not_depend_on_flash_colour() {
        let face = textured(200, 200);
        let (plain, _) = prepare_input(&face, 64);
        for gains in [[1.0, 0.55, 0.5], [0.5, 1.0, 0.55], [0.5, 0.6, 1.0]] {
            let (tinted, _) = prepare_input(&lit(&face, gains), 64);
            assert!(
                max_abs_diff(&plain, &tinted) < 0.1,
                "gains {gains:?} changed the detector input"
            );
        }
    }

    #[test]
    fn luma_is_stretched_to_full_range() {
        let frame = lit(&textured(50, 50), [0.3, 0.3, 0.3]);
        let luma = normalized_luma(&frame);
        assert_eq!(luma.pixels().map(|p| p.0[0]).min(), Some(0));
        assert_eq!(luma.pixels().map(|p| p.0[0]).max(), Some(255));

        let flat = normalized_luma(&RgbImage::from_pixel(4, 4, Rgb([90, 90, 90])));
        assert!(flat.pixels().all(|p| p.0[0] == 90));
    }

    #[test]
    fn letterbox_keeps_aspect_ratio() {
        let wide = Letterbox::fit(1280, 720, 640);
        assert_eq!((wide.width, wide.height), (640, 360));
        assert_eq!(wide.scale, 0.5);

        let tall = Letterbox::fit(480, 640, 640);
        assert_eq!((tall.width, tall.height), (480, 640));
        assert_eq!(tall.scale, 1.0);
    }

    #[test]
    fn padding_is_black() {
        let (data, fit) = prepare_input(&RgbImage::from_pixel(64, 32, Rgb([200; 3])), 64);
        assert_eq!((fit.width, fit.height), (64, 32));
        assert_eq!(data.len(), 3 * 64 * 64);
        // bottom-right corner lies in the padding
        assert_eq!(data[64 * 64 - 1], to_input(0));
        assert_eq!(data[0], to_input(200));
    }

    #[test]
    fn decodes_anchor_distances() {
        // 32x32 input, stride 8: 4x4 cells, 2 anchors each
        let mut scores = vec![0.0; 32];
        let mut distances = vec![0.0; 128];
        // cell (x=2, y=1) -> index 6, second anchor
        let k = 6 * 2 + 1;
        scores[k] = 0.9;
        distances[k * 4..k * 4 + 4].copy_from_slice(&[1.0, 1.0, 2.0, 1.5]);

        let mut out = Vec::new();
        decode_level(&scores, &distances, 8, 32, 0.5, &mut out).unwrap();
        assert_eq!(
            out,
            vec![Detection {
                x1: 8.0,
                y1: 0.0,
                x2: 32.0,
                y2: 20.0,
                score: 0.9,
            }]
        );
    }

    #[test]
    fn wrong_output_shape_is_reported() {
        let mut out = Vec::new();
        let err = decode_level(&[0.0; 3], &[0.0; 12], 8, 32, 0.5, &mut out).unwrap_err();
        assert!(matches!(err, DetectorError::Output(_)));
    }

    #[test]
    fn nms_keeps_best_of_overlapping_boxes() {
        let d = |x1: f32, score: f32| Detection {
            x1,
            y1: 0.0,
            x2: x1 + 100.0,
            y2: 100.0,
            score,
        };
        let kept = non_max_suppression(vec![d(0.0, 0.6), d(5.0, 0.9), d(300.0, 0.7)], 0.4);
        assert_eq!(kept, vec![d(5.0, 0.9), d(300.0, 0.7)]);
    }

    #[test]
    fn boxes_map_back_to_frame_pixels() {
        let fit = Letterbox::fit(1280, 720, 640);
        let d = Detection {
            x1: 100.0,
            y1: 50.0,
            x2: 200.0,
            y2: 175.0,
            score: 0.8,
        };
        assert_eq!(to_face_box(&d, &fit), FaceBox::new(200, 100, 200, 250));
    }

    #[test]
    fn config_validation() {
        assert!(DetectorConfig::default().validate().is_ok());
        let bad = DetectorConfig {
            input_size: 100,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = DetectorConfig {
            score_threshold: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn missing_model_is_an_asset_error() {
        let dir = std::env::temp_dir().join("deepshield-no-such-model-dir");
        assert!(matches!(
            ScrfdModel::resolve(Some(&dir), DetectorConfig::default()),
            Err(DetectorError::Asset(ModelIntegrityError::MissingModel { .. }))
        ));
    }

    #[test]
    fn unreadable_model_is_io_error() {
        let path = std::env::temp_dir().join("deepshield-no-such-model.onnx");
        assert!(matches!(
            ScrfdModel::load(&path, DetectorConfig::default()),
            Err(DetectorError::Io { .. })
        ));
    }

    #[test]
    fn sort_keeps_detection_order_on_ties() {
        let mut faces = vec![
            FaceBox::new(0, 0, 10, 10),
            FaceBox::new(50, 0, 20, 20),
            FaceBox::new(100, 0, 10, 10),
        ];
        sort_largest_first(&mut faces);
        assert_eq!(faces[0].x, 50);
        assert_eq!(faces[1].x, 0);
        assert_eq!(faces[2].x, 100);
    }
}
