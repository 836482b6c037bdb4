//! Challenge patterns: the colour sequence the client flashes on screen.

use crate::signal::Channel;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lead-in of black screen before the first flash.
pub const DEFAULT_LEAD_IN_MS: f64 = 500.0;
/// How long each colour stays on screen.
pub const DEFAULT_FLASH_MS: f64 = 500.0;
/// Black screen after the last flash, before recording stops.
pub const DEFAULT_TRAILER_MS: f64 = 200.0;

const PRIMARIES: [ColorToken; 3] = [ColorToken::Red, ColorToken::Green, ColorToken::Blue];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("challenge pattern has no colours")]
    Empty,
}

/// One colour of a challenge. Colours the camera signal cannot measure are
/// kept as [`ColorToken::Other`] so they still count toward the pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColorToken {
    Red,
    Green,
    Blue,
    Other(String),
}

impl ColorToken {
    pub fn parse(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "red" => ColorToken::Red,
            "green" => ColorToken::Green,
            "blue" => ColorToken::Blue,
            other => ColorToken::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ColorToken::Red => "red",
            ColorToken::Green => "green",
            ColorToken::Blue => "blue",
            ColorToken::Other(name) => name,
        }
    }

    /// Camera channel that responds to this colour.
    pub fn channel(&self) -> Option<Channel> {
        match self {
            ColorToken::Red => Some(Channel::Red),
            ColorToken::Green => Some(Channel::Green),
            ColorToken::Blue => Some(Channel::Blue),
            ColorToken::Other(_) => None,
        }
    }
}

impl fmt::Display for ColorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ColorToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Ordered colour sequence issued to the client. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ChallengePattern {
    tokens: Vec<ColorToken>,
}

impl ChallengePattern {
    pub fn new(tokens: Vec<ColorToken>) -> Result<Self, PatternError> {
        if tokens.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(Self { tokens })
    }

    /// Random pattern of `len` primaries. When `len >= 3` every primary
    /// appears at least once.
    pub fn random<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Result<Self, PatternError> {
        let mut tokens: Vec<ColorToken> = Vec::with_capacity(len);
        if len >= PRIMARIES.len() {
            tokens.extend(PRIMARIES.iter().cloned());
        }
        while tokens.len() < len {
            tokens.push(PRIMARIES[rng.gen_range(0..PRIMARIES.len())].clone());
        }
        tokens.shuffle(rng);
        Self::new(tokens)
    }

    pub fn tokens(&self) -> &[ColorToken] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Distinct colours of the pattern; order is irrelevant for matching.
    pub fn unique_colors(&self) -> BTreeSet<&ColorToken> {
        self.tokens.iter().collect()
    }
}

impl FromStr for ChallengePattern {
    type Err = PatternError;

    /// Parse `"red,green,blue"`. Tokens are case-insensitive; blanks are dropped.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ColorToken::parse)
            .collect();
        Self::new(tokens)
    }
}

impl fmt::Display for ChallengePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(token.as_str())?;
        }
        Ok(())
    }
}

/// One interval of the on-screen sequence. `color == None` is black.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleStep {
    pub color: Option<ColorToken>,
    pub start_ms: f64,
    pub duration_ms: f64,
}

/// Display timing of a challenge, relative to recording start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChallengeSchedule {
    pub pattern: ChallengePattern,
    pub lead_in_ms: f64,
    pub flash_ms: f64,
    pub trailer_ms: f64,
}

impl ChallengeSchedule {
    pub fn new(pattern: ChallengePattern) -> Self {
        Self::with_timing(pattern, DEFAULT_LEAD_IN_MS, DEFAULT_FLASH_MS, DEFAULT_TRAILER_MS)
    }

    pub fn with_timing(pattern: ChallengePattern, lead_in_ms: f64, flash_ms: f64, trailer_ms: f64) -> Self {
        Self {
            pattern,
            lead_in_ms,
            flash_ms,
            trailer_ms,
        }
    }

    /// Onset of the first flash of `color`, if the pattern contains it.
    pub fn onset_of(&self, color: &ColorToken) -> Option<f64> {
        self.pattern
            .tokens()
            .iter()
            .position(|t| t == color)
            .map(|i| self.lead_in_ms + i as f64 * self.flash_ms)
    }

    /// Flash offset for delta/latency analysis: onset of the first red flash,
    /// or of the first flash when the pattern has no red.
    pub fn flash_offset_ms(&self) -> f64 {
        self.onset_of(&ColorToken::Red).unwrap_or(self.lead_in_ms)
    }

    pub fn total_ms(&self) -> f64 {
        self.lead_in_ms + self.pattern.len() as f64 * self.flash_ms + self.trailer_ms
    }

    pub fn steps(&self) -> Vec<ScheduleStep> {
        let mut steps = Vec::with_capacity(self.pattern.len() + 2);
        steps.push(ScheduleStep {
            color: None,
            start_ms: 0.0,
            duration_ms: self.lead_in_ms,
        });
        for (i, token) in self.pattern.tokens().iter().enumerate() {
            steps.push(ScheduleStep {
                color: Some(token.clone()),
                start_ms: self.lead_in_ms + i as f64 * self.flash_ms,
                duration_ms: self.flash_ms,
            });
        }
        steps.push(ScheduleStep {
            color: None,
            start_ms: self.lead_in_ms + self.pattern.len() as f64 * self.flash_ms,
            duration_ms: self.trailer_ms,
        });
        steps
    }
}
