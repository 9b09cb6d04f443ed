//! Helpers that damage files on disk.
//!
//! All helpers write through the file system, so datafiles must be closed
//! (or not yet opened) when they are used.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Flips every bit of the byte at `offset`.
pub fn corrupt_byte(path: &Path, offset: u64) {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .expect("Failed to open file");
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).expect("Failed to seek");
    file.read_exact(&mut byte).expect("Failed to read byte");
    byte[0] = !byte[0];
    file.seek(SeekFrom::Start(offset)).expect("Failed to seek");
    file.write_all(&byte).expect("Failed to write byte");
}

/// Overwrites `len` bytes at `offset` with zeros.
pub fn zero_range(path: &Path, offset: u64, len: usize) {
    write_at(path, offset, &vec![0u8; len]);
}

/// Writes `bytes` at `offset`.
pub fn write_at(path: &Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .expect("Failed to open file");
    file.seek(SeekFrom::Start(offset)).expect("Failed to seek");
    file.write_all(bytes).expect("Failed to write");
    file.sync_all().expect("Failed to sync");
}

/// Writes the first `written` bytes of `marker` at `offset` and zeros for
/// the rest, as if the tail never reached the disk.
pub fn write_torn_marker(path: &Path, offset: u64, marker: &[u8], written: usize) {
    let mut torn = vec![0u8; marker.len()];
    let written = written.min(marker.len());
    torn[..written].copy_from_slice(&marker[..written]);
    write_at(path, offset, &torn);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn helpers_change_expected_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, [0xFFu8; 16]).unwrap();

        corrupt_byte(&path, 0);
        zero_range(&path, 4, 2);
        write_torn_marker(&path, 8, &[1, 2, 3, 4], 2);

        let data = fs::read(&path).unwrap();
        assert_eq!(data[0], 0x00);
        assert_eq!(&data[4..6], &[0, 0]);
        assert_eq!(&data[8..12], &[1, 2, 0, 0]);
        assert_eq!(data[15], 0xFF);
    }
}
