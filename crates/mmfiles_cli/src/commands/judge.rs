//! Judge command implementation.

use mmfiles_core::{Datafile, Judgement};
use std::path::Path;

/// Runs the judge command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let verdict = Datafile::judge(path);
    let text = match verdict {
        Judgement::Ok => "ok",
        Judgement::Empty => "empty",
        Judgement::Unreadable => "unreadable",
    };
    println!("{}: {}", path.display(), text);
    verdict.into_result(path)?;
    Ok(())
}
