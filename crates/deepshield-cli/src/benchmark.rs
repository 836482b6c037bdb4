//! `deepshield benchmark`: accuracy over a labelled corpus of clips.

use crate::config::Config;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use deepshield_core::{ChallengePattern, Engine, ImageSequenceDecoder, VerificationMode, Verdict};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(clap::Args)]
pub struct Args {
    /// Directory of live clips (one sub-directory per clip).
    #[arg(long)]
    real: PathBuf,

    /// Directory of spoof clips (one sub-directory per clip).
    #[arg(long)]
    fakes: PathBuf,

    /// Challenge the clips were recorded against.
    #[arg(long, default_value = "red,green,blue")]
    challenge: ChallengePattern,

    /// Frame rate of the clips, used when frames carry no timestamps.
    #[arg(long)]
    fps: Option<f64>,

    /// Write a JSON report to this file.
    #[arg(long)]
    report: Option<PathBuf>,
}

/// Confusion counts with "live" as the positive class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub true_positives: usize,
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl Tally {
    pub fn record(&mut self, expected_real: bool, verified: bool) {
        match (expected_real, verified) {
            (true, true) => self.true_positives += 1,
            (true, false) => self.false_negatives += 1,
            (false, false) => self.true_negatives += 1,
            (false, true) => self.false_positives += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.true_negatives + self.false_positives + self.false_negatives
    }

    /// Share of correctly classified clips; 0 for an empty corpus.
    pub fn accuracy(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            n => (self.true_positives + self.true_negatives) as f64 / n as f64,
        }
    }

    pub fn suggestions(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.false_negatives > 0 {
            out.push("Too many live clips rejected: consider lowering the detection thresholds.");
        }
        if self.false_positives > 0 {
            out.push("Too many spoofs accepted: consider raising the detection thresholds.");
        }
        out
    }
}

#[derive(Serialize)]
struct ClipResult {
    clip: PathBuf,
    expected_real: bool,
    verdict: Verdict,
}

#[derive(Serialize)]
struct Report {
    generated_at: DateTime<Utc>,
    challenge: ChallengePattern,
    accuracy: f64,
    tally: Tally,
    suggestions: Vec<&'static str>,
    clips: Vec<ClipResult>,
}

/// Clip directories directly under `dir`, in name order.
fn list_clips(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let mut clips = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            clips.push(path);
        }
    }
    clips.sort();
    Ok(clips)
}

pub fn run(config: &Config, args: Args) -> Result<()> {
    let real = list_clips(&args.real)?;
    let fakes = list_clips(&args.fakes)?;
    println!("Found {} real and {} fake clips.", real.len(), fakes.len());

    let engine = Engine::with_scrfd(config.engine_config()?, Some(&config.model_dir));
    let decoder = ImageSequenceDecoder::new(args.fps);
    let mode = VerificationMode::Pattern(args.challenge.clone());

    let mut tally = Tally::default();
    let mut clips = Vec::with_capacity(real.len() + fakes.len());

    for (expected_real, set) in [(true, real), (false, fakes)] {
        println!();
        println!("Testing {} clips...", if expected_real { "real" } else { "fake" });
        for clip in set {
            let verdict = engine.verify_file(&decoder, &clip, &mode);
            tally.record(expected_real, verdict.verified);

            let status = if verdict.verified == expected_real { "PASS" } else { "FAIL" };
            let label = if verdict.verified { "Real" } else { "Fake" };
            let name = clip.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            println!(
                "  [{status}] {name} -> {label} (confidence {:.2}, {})",
                verdict.confidence, verdict.reason
            );

            clips.push(ClipResult {
                clip,
                expected_real,
                verdict,
            });
        }
    }

    println!();
    println!("Accuracy: {:.2}%", tally.accuracy() * 100.0);
    println!(
        "True positives: {}/{}",
        tally.true_positives,
        tally.true_positives + tally.false_negatives
    );
    println!(
        "True negatives: {}/{}",
        tally.true_negatives,
        tally.true_negatives + tally.false_positives
    );
    for suggestion in tally.suggestions() {
        println!("Suggestion: {suggestion}");
    }

    if let Some(path) = &args.report {
        let report = Report {
            generated_at: Utc::now(),
            challenge: args.challenge,
            accuracy: tally.accuracy(),
            tally,
            suggestions: tally.suggestions(),
            clips,
        };
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(path, json).with_context(|| format!("failed to write report {}", path.display()))?;
        println!("Report written to {}", path.display());
    }

    Ok(())
}
