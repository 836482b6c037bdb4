//! Per-frame samples assembled into timestamp-ordered channel signals.

use crate::roi::RoiStats;
use ndarray::Array1;
use serde::Serialize;

/// Colour channel of a [`ChannelSample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Red, Channel::Green, Channel::Blue];
}

/// Mean ROI intensity of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelSample {
    pub timestamp_ms: f64,
    pub frame_index: usize,
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glare_pct: Option<f64>,
}

impl ChannelSample {
    pub fn channel(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Red => self.red,
            Channel::Green => self.green,
            Channel::Blue => self.blue,
        }
    }
}

/// Timestamp of a decoded frame: the native timestamp when present and
/// positive, else derived from the decoded-frame index.
pub fn frame_timestamp_ms(native_ms: Option<f64>, frame_index: usize, fps: f64) -> f64 {
    match native_ms {
        Some(ts) if ts.is_finite() && ts > 0.0 => ts,
        _ => frame_index as f64 / fps * 1000.0,
    }
}

/// Timestamp-ordered samples of one clip.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Signal {
    samples: Vec<ChannelSample>,
}

impl Signal {
    pub fn samples(&self) -> &[ChannelSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn timestamps(&self) -> Array1<f64> {
        self.samples.iter().map(|s| s.timestamp_ms).collect()
    }

    pub fn channel(&self, channel: Channel) -> Array1<f64> {
        self.samples.iter().map(|s| s.channel(channel)).collect()
    }

    /// First difference of `channel`. Element 0 is 0: there is no prior sample.
    pub fn deltas(&self, channel: Channel) -> Array1<f64> {
        let mut prev = None;
        self.samples
            .iter()
            .map(|s| {
                let value = s.channel(channel);
                let delta = prev.map_or(0.0, |p| value - p);
                prev = Some(value);
                delta
            })
            .collect()
    }
}

/// Accumulates extractor output into a [`Signal`].
#[derive(Debug)]
pub struct SignalAssembler {
    fps: f64,
    samples: Vec<ChannelSample>,
}

impl SignalAssembler {
    pub fn new(fps: f64) -> Self {
        Self {
            fps,
            samples: Vec::new(),
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Append the sample of decoded frame `frame_index`.
    ///
    /// A timestamp earlier than the previous sample is raised to it so the
    /// signal stays non-decreasing.
    pub fn push(&mut self, frame_index: usize, native_ms: Option<f64>, stats: RoiStats) {
        let mut timestamp_ms = frame_timestamp_ms(native_ms, frame_index, self.fps);
        if let Some(last) = self.samples.last() {
            if timestamp_ms < last.timestamp_ms {
                tracing::debug!(
                    frame = frame_index,
                    timestamp_ms,
                    previous_ms = last.timestamp_ms,
                    "out-of-order timestamp clamped"
                );
                timestamp_ms = last.timestamp_ms;
            }
        }

        self.samples.push(ChannelSample {
            timestamp_ms,
            frame_index,
            red: stats.red,
            green: stats.green,
            blue: stats.blue,
            glare_pct: stats.glare_pct,
        });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn finish(self) -> Signal {
        Signal {
            samples: self.samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn stats(red: f64, green: f64, blue: f64) -> RoiStats {
        RoiStats {
            red,
            green,
            blue,
            glare_pct: None,
        }
    }

    #[test]
    fn native_timestamp_wins_when_positive() {
        assert_eq!(frame_timestamp_ms(Some(41.5), 7, 30.0), 41.5);
    }

    #[test]
    fn zero_or_missing_timestamp_uses_frame_index() {
        assert_eq!(frame_timestamp_ms(Some(0.0), 3, 30.0), 100.0);
        assert_eq!(frame_timestamp_ms(None, 15, 30.0), 500.0);
        assert_eq!(frame_timestamp_ms(Some(f64::NAN), 1, 25.0), 40.0);
    }

    #[test]
    fn skipped_frames_do_not_shift_derived_timestamps() {
        let mut asm = SignalAssembler::new(10.0);
        asm.push(0, None, stats(1.0, 1.0, 1.0));
        // frames 1..=3 had no face
        asm.push(4, None, stats(2.0, 2.0, 2.0));
        let signal = asm.finish();
        assert_eq!(signal.timestamps(), array![0.0, 400.0]);
    }

    #[test]
    fn timestamps_never_decrease() {
        let mut asm = SignalAssembler::new(30.0);
        asm.push(0, Some(100.0), stats(1.0, 1.0, 1.0));
        asm.push(1, Some(90.0), stats(1.0, 1.0, 1.0));
        asm.push(2, Some(120.0), stats(1.0, 1.0, 1.0));
        assert_eq!(asm.finish().timestamps(), array![100.0, 100.0, 120.0]);
    }

    #[test]
    fn channel_views() {
        let mut asm = SignalAssembler::new(30.0);
        asm.push(0, None, stats(10.0, 20.0, 30.0));
        asm.push(1, None, stats(15.0, 18.0, 30.0));
        asm.push(2, None, stats(12.0, 25.0, 36.0));
        let signal = asm.finish();

        assert_eq!(signal.len(), 3);
        assert_eq!(signal.channel(Channel::Red), array![10.0, 15.0, 12.0]);
        assert_eq!(signal.deltas(Channel::Red), array![0.0, 5.0, -3.0]);
        assert_eq!(signal.deltas(Channel::Green), array![0.0, -2.0, 7.0]);
        assert_eq!(signal.deltas(Channel::Blue), array![0.0, 0.0, 6.0]);
    }

    #[test]
    fn empty_signal_views_are_empty() {
        let signal = SignalAssembler::new(30.0).finish();
        assert!(signal.is_empty());
        assert_eq!(signal.deltas(Channel::Red).len(), 0);
    }
}
