//! Decoded frames and the frame-decoding capability the engine consumes.
//!
//! The engine never decodes video itself. Callers hand it a [`FrameSource`]
//! (an open decoder handle) or a [`FrameDecoder`] that can open one from a
//! path. Handles are owned by a single verification and released when it
//! returns, on every exit path.

use image::RgbImage;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Image extensions accepted by [`ImageSequenceDecoder`].
const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Optional per-clip file holding one native timestamp (ms) per frame.
pub const TIMESTAMPS_FILE: &str = "timestamps.txt";

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("video source not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to open video source {path}: {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode frame {index} ({path}): {source}")]
    Decode {
        index: usize,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// A decoded RGB frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// Native decode timestamp in milliseconds, when the decoder reports one.
    pub timestamp_ms: Option<f64>,
    /// Position of this frame in decode order, starting at 0.
    pub index: usize,
}

impl Frame {
    pub fn new(image: RgbImage, index: usize, timestamp_ms: Option<f64>) -> Self {
        Self {
            image,
            timestamp_ms,
            index,
        }
    }
}

/// An open decoder handle yielding frames in decode order.
pub trait FrameSource {
    /// Nominal frame rate, if the container reports one.
    fn fps(&self) -> Option<f64>;

    /// Next decoded frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

/// Opens [`FrameSource`]s from paths.
pub trait FrameDecoder {
    type Source: FrameSource;

    fn open(&self, path: &Path) -> Result<Self::Source, SourceError>;
}

/// Frames held in memory, for callers that decode upstream.
#[derive(Debug, Default)]
pub struct MemorySource {
    frames: VecDeque<Frame>,
    fps: Option<f64>,
}

impl MemorySource {
    pub fn new(frames: Vec<Frame>, fps: Option<f64>) -> Self {
        Self {
            frames: frames.into(),
            fps,
        }
    }
}

impl FrameSource for MemorySource {
    fn fps(&self) -> Option<f64> {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        Ok(self.frames.pop_front())
    }
}

/// Decodes a clip stored as a directory of still frames.
///
/// Frames are read in file-name order. If the directory holds a
/// [`TIMESTAMPS_FILE`], line `i` is the native timestamp of frame `i`.
#[derive(Debug, Clone, Default)]
pub struct ImageSequenceDecoder {
    fps: Option<f64>,
}

impl ImageSequenceDecoder {
    pub fn new(fps: Option<f64>) -> Self {
        Self { fps }
    }
}

impl FrameDecoder for ImageSequenceDecoder {
    type Source = ImageSequenceSource;

    fn open(&self, path: &Path) -> Result<ImageSequenceSource, SourceError> {
        if !path.exists() {
            return Err(SourceError::NotFound(path.to_path_buf()));
        }
        if !path.is_dir() {
            return Err(SourceError::Open {
                path: path.to_path_buf(),
                reason: "not a frame directory".to_string(),
            });
        }

        let entries = fs::read_dir(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut frames = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SourceError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let file = entry.path();
            let is_frame = file
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_frame {
                frames.push(file);
            }
        }
        frames.sort();

        let timestamps = read_timestamps(&path.join(TIMESTAMPS_FILE))?;

        tracing::debug!(
            path = %path.display(),
            frames = frames.len(),
            native_timestamps = timestamps.len(),
            "frame sequence opened"
        );

        Ok(ImageSequenceSource {
            frames,
            timestamps,
            fps: self.fps,
            cursor: 0,
        })
    }
}

fn read_timestamps(path: &Path) -> Result<Vec<f64>, SourceError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.parse::<f64>().map_err(|_| SourceError::Open {
                path: path.to_path_buf(),
                reason: format!("invalid timestamp {line:?}"),
            })
        })
        .collect()
}

/// Open handle over an image-sequence clip.
#[derive(Debug)]
pub struct ImageSequenceSource {
    frames: Vec<PathBuf>,
    timestamps: Vec<f64>,
    fps: Option<f64>,
    cursor: usize,
}

impl FrameSource for ImageSequenceSource {
    fn fps(&self) -> Option<f64> {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let Some(path) = self.frames.get(self.cursor) else {
            return Ok(None);
        };
        let index = self.cursor;
        self.cursor += 1;

        let image = image::open(path)
            .map_err(|source| SourceError::Decode {
                index,
                path: path.clone(),
                source,
            })?
            .to_rgb8();

        Ok(Some(Frame::new(
            image,
            index,
            self.timestamps.get(index).copied(),
        )))
    }
}

impl Drop for ImageSequenceSource {
    fn drop(&mut self) {
        tracing::trace!(frames_read = self.cursor, "frame sequence released");
    }
}
