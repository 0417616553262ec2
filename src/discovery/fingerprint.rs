//! Content fingerprinting.
//!
//! The fingerprint is a blake3 hash of the file's bytes, so identical content
//! dropped under a different name or path maps to the same ledger entry.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Hash a file's content, streaming so large videos don't land in memory.
/// Returns the lowercase hex digest.
pub fn fingerprint_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; READ_BUF_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}
