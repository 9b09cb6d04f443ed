//! Repair and truncate command implementations.

use mmfiles_core::{Datafile, EngineContext};
use std::path::Path;
use tracing::{info, warn};

/// Runs the repair command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = EngineContext::default();
    println!("Repairing {}", path.display());

    if Datafile::try_repair(&ctx, path)? {
        info!(datafile = %path.display(), "repair finished");
        println!("✓ Datafile repaired");
        Ok(())
    } else {
        warn!(datafile = %path.display(), "repair made no progress");
        println!("✗ Datafile cannot be repaired");
        Err("repair failed".into())
    }
}

/// Runs the truncate command.
pub fn truncate(path: &Path, position: u32) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = EngineContext::default();
    info!(datafile = %path.display(), position, "truncating datafile");
    Datafile::truncate(&ctx, path, position)?;
    println!(
        "✓ Truncated {} at {position}; the old file was kept with suffix .corrupted",
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::check;
    use mmfiles_testkit::prelude::*;

    #[test]
    fn truncate_then_check_passes() {
        let dir = TestDir::new();
        let path = dir.datafile_path(1);
        let cut = {
            let mut df = dir.create_datafile(&test_context(), 1, 8192);
            append_document(&mut df, "a", 2);
            let cut = append_document(&mut df, "b", 3);
            append_document(&mut df, "c", 4);
            cut
        };

        truncate(&path, cut).unwrap();
        assert!(path.with_extension("db.corrupted").exists());
        check::run(&path, false).unwrap();

        let df = Datafile::open(&test_context(), &path, false).unwrap();
        assert!(df.is_sealed());
        assert_eq!(df.tick_max(), 2);
    }

    #[test]
    fn truncate_inside_header_is_refused() {
        let dir = TestDir::new();
        let path = dir.datafile_path(1);
        drop(dir.create_datafile(&test_context(), 1, 8192));
        assert!(truncate(&path, 8).is_err());
        assert!(!path.with_extension("db.corrupted").exists());
    }
}
