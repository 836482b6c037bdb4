//! Challenge-response liveness strategies.
//!
//! The client flashes coloured light from its screen while recording the
//! user's face. Skin reflects that light back into the camera with a short,
//! physically bounded delay, and only in the colours actually shown. Each
//! strategy tests a different aspect of that reflection against the signal
//! assembled from the clip:
//!
//! - [`flash`]: a single red flash at a known offset must raise the forehead
//!   red level above the pre-flash baseline within a bounded latency.
//! - [`pattern`]: every distinct colour of an issued challenge must produce a
//!   step response in its channel, with a glare guard against screen replays.
//! - [`reference`]: the green channel must correlate with a square wave of
//!   its own estimated flash period. Needs no challenge metadata.
//!
//! # Threat Coverage
//!
//! - **Blocks:** Pre-recorded video of a face (does not follow a fresh random
//!   challenge), static photographs (no reflection response), replays held up
//!   to the camera on a glossy display (specular glare).
//! - **Does not block:** Real-time face re-enactment that renders the
//!   challenge colours onto a synthetic face, or a live accomplice. Identity
//!   matching is out of scope.

pub mod flash;
pub mod pattern;
pub mod reference;

pub use flash::{check_flash_response, FlashAnalysis, FlashConfig};
pub use pattern::{check_pattern_response, GlareTally, PatternConfig};
pub use reference::{check_reference_correlation, ReferenceAnalysis, ReferenceConfig};
