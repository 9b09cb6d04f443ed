//! CLI command implementations.

pub mod check;
pub mod judge;
pub mod repair;
pub mod scan;
pub mod wal;
