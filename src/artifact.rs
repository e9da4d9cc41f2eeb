//! The finished disk image: size validation, checksum and CI build stats.

use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::error::ArtifactError;

const MIB: u64 = 1024 * 1024;

/// Smallest plausible image.
pub const MIN_IMAGE_SIZE: u64 = 50 * MIB;
/// Largest plausible image.
pub const MAX_IMAGE_SIZE: u64 = 300 * MIB;

/// Stats file written next to the image after a CI build.
pub const STATS_FILE: &str = "build-stats.json";

/// Accept sizes in `MIN_IMAGE_SIZE..=MAX_IMAGE_SIZE`.
pub fn check_image_size(size: u64) -> Result<(), ArtifactError> {
    if (MIN_IMAGE_SIZE..=MAX_IMAGE_SIZE).contains(&size) {
        Ok(())
    } else {
        Err(ArtifactError::SizeOutOfRange {
            size,
            min: MIN_IMAGE_SIZE,
            max: MAX_IMAGE_SIZE,
        })
    }
}

/// Check that the image exists and has a plausible size. Returns the size.
pub fn verify_image(path: &Path) -> Result<u64> {
    let meta = fs::metadata(path).map_err(|_| ArtifactError::Missing(path.to_path_buf()))?;
    let size = meta.len();
    check_image_size(size)?;
    Ok(size)
}

/// SHA-256 of a file, hex encoded.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Write `<image>.sha256` in `sha256sum` format. Returns the sidecar path.
pub fn write_checksum(image: &Path) -> Result<PathBuf> {
    let digest = sha256_file(image)?;
    let file_name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sidecar = PathBuf::from(format!("{}.sha256", image.display()));
    fs::write(&sidecar, format!("{}  {}\n", digest, file_name))
        .with_context(|| format!("Failed to write {}", sidecar.display()))?;
    Ok(sidecar)
}

/// Record of a successful CI build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStats {
    pub build_time: DateTime<Local>,
    pub image_size: u64,
    pub ci_environment: bool,
    pub build_number: String,
    pub commit_sha: String,
}

impl BuildStats {
    pub fn new(config: &Config, image_size: u64) -> Self {
        Self {
            build_time: Local::now(),
            image_size,
            ci_environment: config.is_ci,
            build_number: config.build_number.clone(),
            commit_sha: config.commit_sha.clone(),
        }
    }

    /// Pretty-printed JSON at `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}
