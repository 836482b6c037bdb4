//! `deepshield analyze`: verify one clip.

use crate::config::Config;
use anyhow::{Context, Result};
use clap::ArgGroup;
use deepshield_core::{
    ChallengePattern, ChannelSample, Engine, ImageSequenceDecoder, VerificationMode, Verdict,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(clap::Args)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["flash_offset", "challenge", "reference"])
))]
pub struct Args {
    /// Clip directory, one image per frame in name order.
    clip: PathBuf,

    /// Onset of the red flash, in ms from recording start.
    #[arg(long)]
    flash_offset: Option<f64>,

    /// Issued challenge, e.g. `red,green,blue`.
    #[arg(long)]
    challenge: Option<ChallengePattern>,

    /// Correlate against a self-derived reference; needs no challenge.
    #[arg(long)]
    reference: bool,

    /// Frame rate of the clip, used when frames carry no timestamps.
    #[arg(long)]
    fps: Option<f64>,

    /// Print the strategy-specific result record instead of the verdict.
    #[arg(long)]
    legacy: bool,

    /// Write the assembled signal to this file as JSON.
    #[arg(long)]
    dump_signal: Option<PathBuf>,
}

#[derive(Serialize)]
struct SignalDump<'a> {
    clip: &'a Path,
    mode: &'static str,
    fps: f64,
    frames_decoded: usize,
    frames_with_face: usize,
    samples: &'a [ChannelSample],
}

pub fn run(config: &Config, args: Args) -> Result<()> {
    let engine = Engine::with_scrfd(config.engine_config()?, Some(&config.model_dir));
    let decoder = ImageSequenceDecoder::new(args.fps);

    let verdict = match VerificationMode::select(args.flash_offset, args.challenge) {
        Err(e) => {
            tracing::warn!(error = %e, "invalid verification request");
            Verdict::rejected(e.reason())
        }
        Ok(mode) => match &args.dump_signal {
            None => engine.verify_file(&decoder, &args.clip, &mode),
            Some(dump_path) => {
                let _span = tracing::info_span!("verify", mode = mode.name()).entered();
                match engine.capture_file(&decoder, &args.clip, &mode) {
                    Ok(capture) => {
                        let dump = SignalDump {
                            clip: &args.clip,
                            mode: mode.name(),
                            fps: capture.fps,
                            frames_decoded: capture.frames_decoded,
                            frames_with_face: capture.frames_with_face,
                            samples: capture.signal.samples(),
                        };
                        let json = serde_json::to_string_pretty(&dump)?;
                        fs::write(dump_path, json).with_context(|| {
                            format!("failed to write signal dump {}", dump_path.display())
                        })?;
                        engine.analyze(&capture, &mode)
                    }
                    Err(reason) => Verdict::rejected(reason),
                }
            }
        },
    };

    let json = match (args.legacy, args.flash_offset.is_some(), args.reference) {
        (true, true, _) => serde_json::to_string_pretty(&verdict.to_flash_report())?,
        (true, false, false) => serde_json::to_string_pretty(&verdict.to_pattern_report())?,
        _ => serde_json::to_string_pretty(&verdict)?,
    };
    println!("{json}");
    Ok(())
}
