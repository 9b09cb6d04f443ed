//! Scan command implementation.

use mmfiles_core::{Datafile, DatafileScan, EngineContext, ScanStatus};
use std::path::Path;

/// Runs the scan command.
pub fn run(path: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = EngineContext::default();
    let report = Datafile::scan(&ctx, path);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(path, &report);
    }

    if report.status == ScanStatus::Clean {
        Ok(())
    } else {
        Err(format!("scan of {} found problems: {:?}", path.display(), report.status).into())
    }
}

fn print_report(path: &Path, report: &DatafileScan) {
    println!("Datafile: {}", path.display());
    println!("  current size: {}", report.current_size);
    println!("  maximal size: {}", report.maximal_size);
    println!("  end position: {}", report.end_position);
    println!("  markers:      {}", report.number_markers);
    println!("  sealed:       {}", report.is_sealed);
    println!("  status:       {:?}", report.status);
    println!();

    for entry in &report.entries {
        print!(
            "{:>10}  {:>8}  tick {:>12}  {:<28} {:?}",
            entry.position, entry.size, entry.tick, entry.type_name, entry.status
        );
        if let Some(key) = &entry.key {
            print!("  key={key}");
        }
        println!();
        if let Some(diagnosis) = &entry.diagnosis {
            println!("            {diagnosis}");
        }
    }
}
