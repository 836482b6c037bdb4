//! `deepshield challenge`: issue a random colour challenge.

use anyhow::{Context, Result};
use deepshield_core::challenge::ScheduleStep;
use deepshield_core::{ChallengePattern, ChallengeSchedule};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

#[derive(clap::Args)]
pub struct Args {
    /// Number of flashes.
    #[arg(long, default_value_t = 3)]
    length: usize,

    /// Seed for a reproducible pattern.
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Serialize)]
struct Issued {
    pattern: String,
    colors: ChallengePattern,
    flash_offset_ms: f64,
    total_ms: f64,
    steps: Vec<ScheduleStep>,
}

fn issue(length: usize, seed: Option<u64>) -> Result<Issued> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let pattern = ChallengePattern::random(length, &mut rng).context("cannot issue challenge")?;
    let schedule = ChallengeSchedule::new(pattern);
    tracing::debug!(pattern = %schedule.pattern, "challenge issued");

    Ok(Issued {
        pattern: schedule.pattern.to_string(),
        flash_offset_ms: schedule.flash_offset_ms(),
        total_ms: schedule.total_ms(),
        steps: schedule.steps(),
        colors: schedule.pattern,
    })
}

pub fn run(args: Args) -> Result<()> {
    let issued = issue(args.length, args.seed)?;
    println!("{}", serde_json::to_string_pretty(&issued)?);
    Ok(())
}
