//! # mmfiles storage
//!
//! Memory-mapped regions backing mmfiles datafiles.
//!
//! This crate is the lowest layer of the engine. A region is an **opaque,
//! fixed-length byte buffer** that is shared with the operating system's
//! page cache. Regions do not know anything about markers, ticks or
//! datafile headers; the core crate owns all format interpretation.
//!
//! ## Design Principles
//!
//! - A region never grows; its length is fixed when it is created
//! - Writes go straight into the mapping, durability comes from `flush_range`
//! - Protection can be downgraded to read-only once a file is sealed
//! - All `unsafe` mapping calls are confined to one private module
//!
//! ## Available Regions
//!
//! - [`AnonymousRegion`] - Anonymous mapping, nothing reaches the disk
//! - [`FileRegion`] - Shared mapping of a physical file
//!
//! ## Example
//!
//! ```rust
//! use mmfiles_storage::{AnonymousRegion, MappedRegion};
//!
//! let mut region = AnonymousRegion::new(4096).unwrap();
//! region.as_mut_slice().unwrap()[..5].copy_from_slice(b"hello");
//! assert_eq!(&region.as_slice()[..5], b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod region;
mod sys;

pub use error::{StorageError, StorageResult};
pub use file::FileRegion;
pub use memory::AnonymousRegion;
pub use region::{AccessPattern, MappedRegion, Protection};
pub use sys::{page_size, FALLBACK_PAGE_SIZE};
