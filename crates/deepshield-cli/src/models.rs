//! `deepshield models`: locate, verify and install the detector asset.

use crate::config::Config;
use anyhow::{bail, Context, Result};
use clap::Subcommand;
use deepshield_core::ScrfdModel;
use deepshield_models::{resolve_asset, sha256_file_hex, AssetFile, ASSETS};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum Command {
    /// Print where each asset resolves to.
    Path,
    /// Check every asset against its checksum and load the detector.
    Verify,
    /// Download the detector assets into the model directory.
    Install {
        /// Copy from this directory instead of downloading.
        #[arg(long)]
        from: Option<PathBuf>,
    },
}

/// Where `install` takes asset bytes from.
enum Origin<'a> {
    Download,
    Copy(&'a Path),
}

pub fn run(config: &Config, cmd: Command) -> Result<()> {
    println!("Model directory: {}", config.model_dir.display());
    match cmd {
        Command::Path => {
            for asset in ASSETS {
                match resolve_asset(asset, Some(&config.model_dir)) {
                    Ok(path) => println!("  {} -> {}", asset.name, path.display()),
                    Err(e) => println!("  {} unavailable: {e}", asset.name),
                }
            }
            Ok(())
        }
        Command::Verify => verify(config),
        Command::Install { from } => {
            let origin = from.as_deref().map_or(Origin::Download, Origin::Copy);
            install(ASSETS, &origin, &config.model_dir)
        }
    }
}

fn verify(config: &Config) -> Result<()> {
    for asset in ASSETS {
        let path = resolve_asset(asset, Some(&config.model_dir))?;
        println!("  {} ok ({})", asset.name, path.display());
    }
    let detector = config.engine_config()?.detector;
    ScrfdModel::resolve(Some(&config.model_dir), detector).context("detector is unusable")?;
    println!("All assets verified.");
    Ok(())
}

/// Stream `asset.url` into `tmp_path`, printing progress every 10%.
fn download(asset: &AssetFile, tmp_path: &Path) -> Result<()> {
    let resp = ureq::get(asset.url)
        .call()
        .with_context(|| format!("failed to download {}", asset.url))?;

    let content_length = resp
        .headers()
        .get("Content-Length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut reader = resp.into_body().into_reader();
    let mut file = fs::File::create(tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut buf = [0u8; 65536];
    let mut total: u64 = 0;
    let mut last_pct: u64 = 0;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        total += n as u64;

        if let Some(len) = content_length.filter(|&len| len > 0) {
            let pct = (total * 100) / len;
            if pct / 10 > last_pct / 10 {
                print!("  {pct}%\r");
                io::stdout().flush().ok();
                last_pct = pct;
            }
        }
    }

    file.flush()?;
    Ok(())
}

/// Fetch one asset into a `.part` file and rename it into place once its
/// checksum matches.
fn install_asset(asset: &AssetFile, origin: &Origin<'_>, dest: &Path) -> Result<()> {
    let tmp_path = dest.with_extension("part");

    match origin {
        Origin::Download => {
            println!("  downloading {} ({})...", asset.name, asset.size_display);
            download(asset, &tmp_path)?;
        }
        Origin::Copy(dir) => {
            let src = dir.join(asset.name);
            println!("  copying {} ({})...", asset.name, asset.size_display);
            fs::copy(&src, &tmp_path).with_context(|| {
                format!("failed to copy {} -> {}", src.display(), tmp_path.display())
            })?;
        }
    }

    let digest = sha256_file_hex(&tmp_path)?;
    if digest != asset.sha256 {
        fs::remove_file(&tmp_path).ok();
        bail!(
            "checksum mismatch for {}:\n  expected: {}\n  got:      {}",
            asset.name,
            asset.sha256,
            digest
        );
    }

    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to rename {} -> {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    Ok(())
}

fn install(assets: &[AssetFile], origin: &Origin<'_>, model_dir: &Path) -> Result<()> {
    fs::create_dir_all(model_dir)
        .with_context(|| format!("failed to create directory {}", model_dir.display()))?;

    let mut installed = 0;
    let mut skipped = 0;

    for asset in assets {
        let dest = model_dir.join(asset.name);
        if dest.exists() {
            match sha256_file_hex(&dest) {
                Ok(digest) if digest == asset.sha256 => {
                    println!("  {} already present (checksum ok)", asset.name);
                    skipped += 1;
                    continue;
                }
                Ok(_) => println!("  {} exists but checksum differs, replacing", asset.name),
                Err(_) => println!("  {} exists but unreadable, replacing", asset.name),
            }
        }

        install_asset(asset, origin, &dest)?;
        installed += 1;
    }

    println!();
    if installed > 0 {
        println!("Install complete: {installed} asset(s) installed, {skipped} already present.");
    } else {
        println!("All assets already present. Nothing to install.");
    }

    Ok(())
}
