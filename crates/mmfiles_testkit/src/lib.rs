//! # mmfiles testkit
//!
//! Test utilities for mmfiles.
//!
//! This crate provides:
//! - Fixtures for contexts, datafiles and WAL directories
//! - A crash-injecting mapped region
//! - Helpers that corrupt files on disk
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use mmfiles_testkit::prelude::*;
//!
//! let dir = TestDir::new();
//! let ctx = test_context();
//! let mut datafile = dir.create_datafile(&ctx, 1, 4096);
//! let position = append_document(&mut datafile, "a", ctx.ticks().next());
//! assert_eq!(position, 32);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod corrupt;
pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::corrupt::*;
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use corrupt::*;
pub use crash::*;
pub use fixtures::*;
pub use generators::*;
