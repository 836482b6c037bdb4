//! Regions of interest and per-region intensity statistics.

use crate::detector::FaceBox;
use image::RgbImage;

/// Pixel brightness above which a pixel counts as specular glare.
pub const DEFAULT_GLARE_THRESHOLD: u8 = 250;

/// Side of the fixed frame-centre square, in pixels.
pub const DEFAULT_CENTER_ROI_SIZE: u32 = 50;

/// A rectangle fully inside its frame, with non-zero area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    /// Clip a rectangle to a `frame_width` × `frame_height` frame.
    ///
    /// Returns `None` when nothing of the rectangle remains inside.
    pub fn clipped(
        x: i64,
        y: i64,
        width: i64,
        height: i64,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Self> {
        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = x.saturating_add(width).min(i64::from(frame_width));
        let y1 = y.saturating_add(height).min(i64::from(frame_height));
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// How a frame's ROI is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoiRule {
    /// Top 30% of the face box, centre 60% of its width. Avoids hair and background.
    Forehead,
    /// Centre 60% × 60% of the face box.
    FaceCenter,
    /// Fixed square at the frame centre; no face required.
    FrameCenter { size: u32 },
}

impl RoiRule {
    pub fn needs_face(&self) -> bool {
        !matches!(self, RoiRule::FrameCenter { .. })
    }

    /// Resolve the rule against a frame. `None` means the frame yields no sample.
    pub fn resolve(&self, face: Option<&FaceBox>, frame_width: u32, frame_height: u32) -> Option<Roi> {
        match *self {
            RoiRule::Forehead => {
                let f = face?;
                let (w, h) = (f64::from(f.width), f64::from(f.height));
                Roi::clipped(
                    i64::from(f.x) + (w * 0.2) as i64,
                    i64::from(f.y),
                    (w * 0.6) as i64,
                    (h * 0.3) as i64,
                    frame_width,
                    frame_height,
                )
            }
            RoiRule::FaceCenter => {
                let f = face?;
                let (w, h) = (f64::from(f.width), f64::from(f.height));
                Roi::clipped(
                    i64::from(f.x) + (w * 0.2) as i64,
                    i64::from(f.y) + (h * 0.2) as i64,
                    (w * 0.6) as i64,
                    (h * 0.6) as i64,
                    frame_width,
                    frame_height,
                )
            }
            RoiRule::FrameCenter { size } => {
                let half = i64::from(size / 2);
                Roi::clipped(
                    i64::from(frame_width / 2) - half,
                    i64::from(frame_height / 2) - half,
                    i64::from(size),
                    i64::from(size),
                    frame_width,
                    frame_height,
                )
            }
        }
    }
}

/// Mean channel intensities over one ROI.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiStats {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    /// Fraction of ROI pixels brighter than the glare threshold, when requested.
    pub glare_pct: Option<f64>,
}

/// Per-channel mean intensity over `roi`, plus the glare fraction when
/// `glare_threshold` is given.
///
/// Brightness is Rec. 709 luma. Returns `None` if `roi` does not overlap the
/// frame.
pub fn extract_roi_stats(frame: &RgbImage, roi: &Roi, glare_threshold: Option<u8>) -> Option<RoiStats> {
    let roi = Roi::clipped(
        i64::from(roi.x),
        i64::from(roi.y),
        i64::from(roi.width),
        i64::from(roi.height),
        frame.width(),
        frame.height(),
    )?;

    let mut sum = [0u64; 3];
    let mut glare = 0u64;
    for y in roi.y..roi.y + roi.height {
        for x in roi.x..roi.x + roi.width {
            let [r, g, b] = frame.get_pixel(x, y).0;
            sum[0] += u64::from(r);
            sum[1] += u64::from(g);
            sum[2] += u64::from(b);
            if let Some(threshold) = glare_threshold {
                let luma = 0.2126 * f64::from(r) + 0.7152 * f64::from(g) + 0.0722 * f64::from(b);
                if luma > f64::from(threshold) {
                    glare += 1;
                }
            }
        }
    }

    let n = roi.area() as f64;
    Some(RoiStats {
        red: sum[0] as f64 / n,
        green: sum[1] as f64 / n,
        blue: sum[2] as f64 / n,
        glare_pct: glare_threshold.map(|_| glare as f64 / n),
    })
}
