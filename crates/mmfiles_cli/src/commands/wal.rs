//! WAL command implementation.

use mmfiles_core::{
    CoreResult, EngineContext, RecoverState, ReplayOperation, ReplayTarget, StorageConfig,
    WalDirectory,
};
use serde::Serialize;
use std::path::Path;

/// Operations a dry-run replay would apply.
#[derive(Debug, Default, Serialize)]
struct ReplayCounts {
    inserts: u64,
    removes: u64,
    database_changes: u64,
    collection_changes: u64,
    view_changes: u64,
}

impl ReplayTarget for ReplayCounts {
    fn apply(&mut self, operation: ReplayOperation<'_>) -> CoreResult<()> {
        match operation {
            ReplayOperation::Insert { .. } => self.inserts += 1,
            ReplayOperation::Remove { .. } => self.removes += 1,
            ReplayOperation::Database { .. } => self.database_changes += 1,
            ReplayOperation::Collection { .. } => self.collection_changes += 1,
            ReplayOperation::View { .. } => self.view_changes += 1,
        }
        Ok(())
    }
}

/// Runs the wal command.
pub fn run(
    dir: &Path,
    last_collected: u64,
    ignore_logfile_errors: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = StorageConfig::default().ignore_logfile_errors(ignore_logfile_errors);
    let ctx = EngineContext::new(config);
    let wal = WalDirectory::open(&ctx, dir, false)?;

    println!("WAL directory: {}", dir.display());
    let mut state = RecoverState::new(ctx.config().ignore_recovery_errors);
    wal.inspect_logfiles(&mut state, last_collected)?;

    println!();
    println!("{:>20}  {:<22} {:>10}  ticks", "logfile", "status", "size");
    for logfile in wal.logfiles() {
        let datafile = logfile.datafile();
        println!(
            "{:>20}  {:<22} {:>10}  {}..{}",
            logfile.id(),
            logfile.status_text(),
            datafile.current_size(),
            datafile.tick_min(),
            datafile.tick_max()
        );
    }
    for path in &state.empty_logfiles {
        println!("{:>20}  {:<22}", path.display(), "empty");
    }

    let mut counts = ReplayCounts::default();
    wal.run_recovery(&mut state, &mut counts)?;

    println!();
    println!("Last tick:              {}", state.last_tick);
    println!("Max revision:           {}", state.max_revision_id);
    println!("Max local document id:  {}", state.max_local_document_id);
    println!("Failed transactions:    {}", state.failed_transactions.len());
    println!("Replay: {}", serde_json::to_string(&counts)?);
    Ok(())
}
