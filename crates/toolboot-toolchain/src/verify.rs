//! Integrity checks for downloaded artifacts.
//!
//! Both checks are read-only. A mismatching file stays in the download
//! cache so it can be inspected.

use std::{fs, path::Path};

use crate::error::{Error, IoContext, Result};
use crate::hashing::sha256_file;

pub fn verify_size(expected: u64, path: &Path) -> Result<()> {
    let meta = fs::metadata(path).io_context(|| format!("stat {}", path.display()))?;
    let actual = meta.len();
    if actual == expected {
        return Ok(());
    }
    Err(Error::Integrity {
        path: path.to_path_buf(),
        what: "size",
        expected: expected.to_string(),
        actual: actual.to_string(),
    })
}

pub fn verify_sha256(expected_hex: &str, path: &Path) -> Result<()> {
    let actual = sha256_file(path).io_context(|| format!("hash {}", path.display()))?;
    if actual.eq_ignore_ascii_case(expected_hex.trim()) {
        return Ok(());
    }
    Err(Error::Integrity {
        path: path.to_path_buf(),
        what: "SHA-256",
        expected: expected_hex.trim().to_string(),
        actual,
    })
}

/// Size first, then hash: the size check is cheap and catches truncation.
pub async fn verify_download(expected_size: u64, expected_sha256: &str, path: &Path) -> Result<()> {
    verify_size(expected_size, path)?;
    let expected = expected_sha256.to_string();
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || verify_sha256(&expected, &owned))
        .await
        .map_err(|e| Error::io("hash task", std::io::Error::other(e)))?
}
