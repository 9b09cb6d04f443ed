//! Operator diagnostics: hex dumps and the fatal legacy-format exit.

use std::fmt::Write as _;
use std::path::Path;

/// Bytes shown per hex dump line.
const BYTES_PER_LINE: usize = 16;

/// Renders `bytes` as offset-prefixed hex lines, starting at `base`.
#[must_use]
pub fn hex_dump(bytes: &[u8], base: usize) -> String {
    let mut out = String::new();
    for (i, chunk) in bytes.chunks(BYTES_PER_LINE).enumerate() {
        let encoded = hex::encode(chunk);
        let grouped: Vec<&str> = (0..encoded.len())
            .step_by(2)
            .map(|j| &encoded[j..j + 2])
            .collect();
        let _ = writeln!(
            out,
            "{:08x}  {}",
            base + i * BYTES_PER_LINE,
            grouped.join(" ")
        );
    }
    out
}

/// Exit code used when a datafile of the 2.8 format is found.
const LEGACY_FORMAT_EXIT_CODE: i32 = 1;

/// Terminates the process after finding a datafile in the 2.8 format.
///
/// This is the only fatal path of the engine. Such files use an
/// incompatible layout and checksum and must be migrated with the export
/// and import tools instead of being opened.
pub fn fatal_legacy_format(path: &Path) -> ! {
    tracing::error!(
        path = %path.display(),
        "datafile found from an older storage format version. Please export the data with \
         the version that wrote it and import it into this instance"
    );
    std::process::exit(LEGACY_FORMAT_EXIT_CODE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_dump_lines() {
        let dump = hex_dump(&[0u8, 1, 2, 0xff], 32);
        assert_eq!(dump, "00000020  00 01 02 ff\n");
    }

    #[test]
    fn hex_dump_wraps() {
        let dump = hex_dump(&[0xAA; 20], 0);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("00000010  aa aa aa aa"));
    }
}
