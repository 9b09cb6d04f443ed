//! Check command implementation.

use mmfiles_core::{Datafile, EngineContext, StorageConfig};
use std::path::Path;
use tracing::warn;

/// Runs the check command.
pub fn run(path: &Path, ignore_failures: bool) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = EngineContext::new(StorageConfig::default().ignore_datafile_errors(ignore_failures));
    println!("Checking {}", path.display());

    let mut datafile = match Datafile::open(&ctx, path, ignore_failures) {
        Ok(datafile) => datafile,
        Err(e) => {
            warn!(datafile = %path.display(), code = e.code(), "datafile check failed");
            println!("✗ {e}");
            return Err(e.into());
        }
    };

    println!("  state:        {}", datafile.state());
    println!("  sealed:       {}", datafile.is_sealed());
    println!("  current size: {}", datafile.current_size());
    println!("  maximal size: {}", datafile.maximal_size());
    println!("  ticks:        {}..{}", datafile.tick_min(), datafile.tick_max());
    println!("  data ticks:   {}..{}", datafile.data_min(), datafile.data_max());
    if let Some(position) = datafile.corrupt_position() {
        warn!(datafile = %path.display(), position, "corruption ignored, datafile was truncated");
        println!("  corrupt at:   {position} (ignored)");
    }
    datafile.close()?;

    println!("✓ Datafile check passed");
    Ok(())
}
