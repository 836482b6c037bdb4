//! DeepShield challenge-response liveness engine.
//!
//! A client records the user's face while its screen flashes coloured light.
//! [`Engine`] turns that clip into a per-frame colour signal and asks one
//! liveness strategy whether the face reflected the light the way live skin
//! does. Every outcome, including missing input, is a [`Verdict`].

pub mod challenge;
pub mod config;
pub mod detector;
pub mod dsp;
pub mod engine;
pub mod frame;
pub mod liveness;
pub mod roi;
pub mod signal;
pub mod verdict;

pub use challenge::{ChallengePattern, ChallengeSchedule, ColorToken, PatternError};
pub use config::{ConfigError, EngineConfig};
pub use detector::{
    DetectorConfig, DetectorError, FaceBox, FaceLocator, LocatorFactory, ScrfdLocator,
    ScrfdModel,
};
pub use engine::{Capture, Engine, ModeError, VerificationMode};
pub use frame::{
    Frame, FrameDecoder, FrameSource, ImageSequenceDecoder, MemorySource, SourceError,
};
pub use signal::{Channel, ChannelSample, Signal};
pub use verdict::{Diagnostics, FlashReport, PatternReport, Reason, ReasonKind, Verdict};

pub use deepshield_models::default_model_dir;
