use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Detector asset descriptor: download URL, expected filename, SHA-256 checksum, human-readable size.
pub struct AssetFile {
    pub name: &'static str,
    pub url: &'static str,
    pub sha256: &'static str,
    pub size_display: &'static str,
}

// Checksum taken from the HuggingFace Git LFS pointer (oid sha256: field).
// Source: https://huggingface.co/public-data/insightface/raw/main/models/buffalo_l/
/// SCRFD-10GF face detector (InsightFace `buffalo_l` pack).
pub const SCRFD_DETECTOR: AssetFile = AssetFile {
    name: "det_10g.onnx",
    url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/det_10g.onnx",
    sha256: "5838f7fe053675b1c7a08b633df49e7af5495cee0493c7dcf6697200b85b5b91",
    size_display: "16 MB",
};

pub const ASSETS: &[AssetFile] = &[SCRFD_DETECTOR];

/// Directory searched (relative to the working directory) when the configured
/// model directory does not hold the asset.
pub const RELATIVE_FALLBACK_DIR: &str = "models";

#[derive(Error, Debug)]
pub enum ModelIntegrityError {
    #[error("model file not found: {name} ({path})")]
    MissingModel { name: &'static str, path: PathBuf },

    #[error("model file is empty: {name} ({path})")]
    EmptyModel { name: &'static str, path: PathBuf },

    #[error("failed to open model file: {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read model file: {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "model checksum mismatch for {name} ({path})\n  expected: {expected}\n  got:      {got}"
    )]
    ChecksumMismatch {
        name: &'static str,
        path: PathBuf,
        expected: String,
        got: String,
    },
}

/// Determine the default model directory.
///
/// When running as root (UID 0), defaults to `/var/lib/deepshield/models`.
/// Otherwise defaults to `$XDG_DATA_HOME/deepshield/models` (~/.local/share/deepshield/models).
pub fn default_model_dir() -> PathBuf {
    if is_root() {
        PathBuf::from("/var/lib/deepshield/models")
    } else {
        let data_home = std::env::var("XDG_DATA_HOME").unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            format!("{home}/.local/share")
        });
        PathBuf::from(data_home).join("deepshield/models")
    }
}

fn is_root() -> bool {
    // SAFETY: geteuid is always safe to call.
    unsafe { libc::geteuid() == 0 }
}

/// Compute SHA-256 hex digest of a file.
pub fn sha256_file_hex(path: &Path) -> Result<String, ModelIntegrityError> {
    let mut file = fs::File::open(path).map_err(|source| ModelIntegrityError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = file
            .read(&mut buf)
            .map_err(|source| ModelIntegrityError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn verify_file_sha256(
    name: &'static str,
    path: &Path,
    expected_sha256: &str,
) -> Result<(), ModelIntegrityError> {
    let meta = fs::metadata(path).map_err(|_| ModelIntegrityError::MissingModel {
        name,
        path: path.to_path_buf(),
    })?;
    if meta.len() == 0 {
        return Err(ModelIntegrityError::EmptyModel {
            name,
            path: path.to_path_buf(),
        });
    }

    let digest = sha256_file_hex(path)?;
    if digest != expected_sha256 {
        return Err(ModelIntegrityError::ChecksumMismatch {
            name,
            path: path.to_path_buf(),
            expected: expected_sha256.to_string(),
            got: digest,
        });
    }

    Ok(())
}

/// Locate `asset`, trying `primary_dir` first and the relative fallback second.
///
/// The first candidate that exists is verified and returned; a corrupt file in
/// the primary directory is reported rather than silently skipped.
pub fn resolve_asset(
    asset: &AssetFile,
    primary_dir: Option<&Path>,
) -> Result<PathBuf, ModelIntegrityError> {
    let mut candidates = Vec::with_capacity(2);
    if let Some(dir) = primary_dir {
        candidates.push(dir.join(asset.name));
    }
    candidates.push(Path::new(RELATIVE_FALLBACK_DIR).join(asset.name));

    for path in &candidates {
        if path.exists() {
            verify_file_sha256(asset.name, path, asset.sha256)?;
            return Ok(path.clone());
        }
    }

    Err(ModelIntegrityError::MissingModel {
        name: asset.name,
        path: candidates.swap_remove(0),
    })
}

pub fn verify_models_dir(model_dir: &Path) -> Result<(), ModelIntegrityError> {
    for asset in ASSETS {
        let path = model_dir.join(asset.name);
        verify_file_sha256(asset.name, &path, asset.sha256)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "deepshield-models-test-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    #[test]
    fn verify_file_sha256_rejects_missing() {
        let path = scratch_dir("missing").join("nope.toml");

        let err = verify_file_sha256("nope.toml", &path, "00").unwrap_err();
        assert!(matches!(err, ModelIntegrityError::MissingModel { .. }));
    }

    #[test]
    fn verify_file_sha256_rejects_empty() {
        let dir = scratch_dir("empty");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("model.toml");
        fs::write(&path, b"").unwrap();

        let err = verify_file_sha256("model.toml", &path, "00").unwrap_err();
        assert!(matches!(err, ModelIntegrityError::EmptyModel { .. }));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn verify_file_sha256_rejects_mismatch() {
        let dir = scratch_dir("mismatch");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("model.toml");
        fs::write(&path, b"hello").unwrap();

        let err = verify_file_sha256("model.toml", &path, "00").unwrap_err();
        assert!(matches!(err, ModelIntegrityError::ChecksumMismatch { .. }));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn verify_file_sha256_accepts_match() {
        let dir = scratch_dir("match");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("model.toml");
        fs::write(&path, b"hello").unwrap();

        let digest = sha256_file_hex(&path).unwrap();
        verify_file_sha256("model.toml", &path, &digest).unwrap();

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn resolve_asset_prefers_primary_dir() {
        let dir = scratch_dir("resolve");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("sample.toml"), b"sample").unwrap();
        let digest = sha256_file_hex(&dir.join("sample.toml")).unwrap();
        let digest: &'static str = Box::leak(digest.into_boxed_str());
        let asset = AssetFile {
            name: "sample.toml",
            url: "file:///dev/null",
            sha256: digest,
            size_display: "5 B",
        };

        let path = resolve_asset(&asset, Some(&dir)).unwrap();
        assert_eq!(path, dir.join("sample.toml"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn resolve_asset_reports_primary_path_when_nothing_found() {
        let dir = scratch_dir("resolve-missing");
        let asset = AssetFile {
            name: "absent-asset.toml",
            url: "file:///dev/null",
            sha256: "00",
            size_display: "0 B",
        };

        match resolve_asset(&asset, Some(&dir)).unwrap_err() {
            ModelIntegrityError::MissingModel { path, .. } => {
                assert_eq!(path, dir.join("absent-asset.toml"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn asset_table_is_well_formed() {
        for asset in ASSETS {
            assert_eq!(asset.sha256.len(), 64, "{}", asset.name);
            assert!(asset.sha256.chars().all(|c| c.is_ascii_hexdigit()));
            assert!(asset.url.ends_with(asset.name));
        }
        assert_eq!(SCRFD_DETECTOR.name, "det_10g.onnx");
    }

    #[test]
    fn verify_models_dir_reports_missing() {
        let dir = scratch_dir("dir-missing");

        let err = verify_models_dir(&dir).unwrap_err();
        assert!(matches!(err, ModelIntegrityError::MissingModel { .. }));
    }
}
