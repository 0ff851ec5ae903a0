//! Incremental file digests for integrity verification.

use crate::error::{Result, ResultIoExt};
use crate::models::HashKind;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

const BLOCK_SIZE: usize = 64 * 1024;

/// Compute the hex digest of a file, reading in fixed-size blocks
pub fn hash_file(path: &Path, kind: HashKind) -> Result<String> {
    match kind {
        HashKind::MD5 => hash_file_with::<Md5>(path),
        HashKind::SHA1 => hash_file_with::<Sha1>(path),
        HashKind::SHA256 => hash_file_with::<Sha256>(path),
    }
}

/// Compare a file's digest against an expected hex string
pub fn check_hash(path: &Path, expected_hex: &str, kind: HashKind) -> Result<bool> {
    let actual = hash_file(path, kind)?;
    Ok(actual.eq_ignore_ascii_case(expected_hex.trim()))
}

fn hash_file_with<D: Digest>(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_io_err(path)?;
    let mut hasher = D::new();
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let n = file.read(&mut buf).map_io_err(path)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(to_hex(&hasher.finalize()))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
