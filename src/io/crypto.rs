use crate::error::Result;
use sha2::{Digest, Sha256};
use std::{fs::File, io, path::Path};

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut f, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// False when the digest differs; errors only when the file cannot be read.
pub fn verify_sha256(path: &Path, expected_hex: &str) -> Result<bool> {
    // reject malformed digests up front
    hex::decode(expected_hex)?;
    Ok(sha256_file(path)?.eq_ignore_ascii_case(expected_hex))
}
