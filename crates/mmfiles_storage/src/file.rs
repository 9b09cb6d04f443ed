//! Shared mapping of a physical file.

use crate::error::{StorageError, StorageResult};
use crate::region::{check_range, AccessPattern, MappedRegion, Protection};
use crate::sys::Mapping;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// A region backed by a physical file, mapped shared.
///
/// Writes through [`MappedRegion::as_mut_slice`] land in the page cache and
/// reach the disk once [`MappedRegion::flush_range`] returns.
///
/// # Example
///
/// ```no_run
/// use mmfiles_storage::{FileRegion, MappedRegion};
/// use std::path::Path;
///
/// let mut region = FileRegion::create(Path::new("datafile-1.db"), 4096).unwrap();
/// region.as_mut_slice().unwrap()[..4].copy_from_slice(b"data");
/// region.flush_range(0, 4).unwrap();
/// ```
#[derive(Debug)]
pub struct FileRegion {
    path: PathBuf,
    file: File,
    mapping: Mapping,
    len: usize,
}

impl FileRegion {
    /// Creates a new file of exactly `len` bytes and maps it read-write.
    ///
    /// The file must not exist. If the mapping fails, the freshly created
    /// file is removed again.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AlreadyExists`] if the file exists, or an I/O
    /// error if the file cannot be created, extended or mapped.
    pub fn create(path: &Path, len: usize) -> StorageResult<Self> {
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let mapped = file
            .set_len(len as u64)
            .and_then(|()| Mapping::map_file(&file, len, Protection::ReadWrite));
        match mapped {
            Ok(mapping) => Ok(Self {
                path: path.to_path_buf(),
                file,
                mapping,
                len,
            }),
            Err(e) => {
                drop(file);
                if let Err(unlink) = fs::remove_file(path) {
                    tracing::warn!(path = %path.display(), error = %unlink, "cannot remove partially created file");
                }
                Err(e.into())
            }
        }
    }

    /// Opens an existing file and maps its whole length.
    ///
    /// The file is always opened read-write so the protection can later be
    /// raised with [`MappedRegion::protect`].
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened or mapped.
    pub fn open(path: &Path, protection: Protection) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = usize::try_from(file.metadata()?.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, "file too large to map")
        })?;
        let mapping = Mapping::map_file(&file, len, protection)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            mapping,
            len,
        })
    }

    /// Returns the underlying file handle.
    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }
}

impl MappedRegion for FileRegion {
    fn len(&self) -> usize {
        self.len
    }

    fn as_slice(&self) -> &[u8] {
        self.mapping.as_slice()
    }

    fn as_mut_slice(&mut self) -> StorageResult<&mut [u8]> {
        self.mapping.as_mut_slice()
    }

    fn flush_range(&self, offset: usize, len: usize) -> StorageResult<()> {
        check_range(offset, len, self.len)?;
        self.mapping.flush_range(offset, len)?;
        Ok(())
    }

    fn protect(&mut self, protection: Protection) -> StorageResult<()> {
        self.mapping.set_protection(protection)
    }

    fn protection(&self) -> Protection {
        self.mapping.protection()
    }

    fn advise(&self, pattern: AccessPattern) -> StorageResult<()> {
        self.mapping.advise(pattern)?;
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn rename(&mut self, to: &Path) -> StorageResult<()> {
        fs::rename(&self.path, to)?;
        self.path = to.to_path_buf();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_has_exact_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("datafile-1.db");

        let region = FileRegion::create(&path, 8192).unwrap();
        assert_eq!(region.len(), 8192);
        assert_eq!(fs::metadata(&path).unwrap().len(), 8192);
        assert!(region.as_slice().iter().all(|b| *b == 0));
    }

    #[test]
    fn file_create_refuses_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("datafile-2.db");
        fs::write(&path, b"x").unwrap();

        let result = FileRegion::create(&path, 4096);
        assert!(matches!(result, Err(StorageError::AlreadyExists { .. })));
    }

    #[test]
    fn file_writes_persist_after_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("datafile-3.db");

        {
            let mut region = FileRegion::create(&path, 4096).unwrap();
            region.as_mut_slice().unwrap()[100..105].copy_from_slice(b"hello");
            region.flush_range(100, 5).unwrap();
        }

        let region = FileRegion::open(&path, Protection::ReadOnly).unwrap();
        assert_eq!(&region.as_slice()[100..105], b"hello");
    }

    #[test]
    fn file_open_read_only_then_writable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("datafile-4.db");
        drop(FileRegion::create(&path, 4096).unwrap());

        let mut region = FileRegion::open(&path, Protection::ReadOnly).unwrap();
        assert_eq!(region.protection(), Protection::ReadOnly);
        assert!(matches!(region.as_mut_slice(), Err(StorageError::ReadOnly)));

        region.protect(Protection::ReadWrite).unwrap();
        region.as_mut_slice().unwrap()[0] = 1;
        assert_eq!(region.as_slice()[0], 1);
    }

    #[test]
    fn file_flush_out_of_bounds_fails() {
        let dir = tempdir().unwrap();
        let region = FileRegion::create(&dir.path().join("datafile-5.db"), 4096).unwrap();

        let result = region.flush_range(4000, 200);
        assert!(matches!(result, Err(StorageError::OutOfBounds { .. })));
    }

    #[test]
    fn file_open_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("datafile-6.db");
        fs::write(&path, b"").unwrap();

        let region = FileRegion::open(&path, Protection::ReadOnly).unwrap();
        assert!(region.is_empty());
        assert!(region.as_slice().is_empty());
    }

    #[test]
    fn file_rename_updates_path() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("journal-7.db");
        let to = dir.path().join("datafile-7.db");

        let mut region = FileRegion::create(&from, 4096).unwrap();
        region.rename(&to).unwrap();

        assert_eq!(region.path(), Some(to.as_path()));
        assert!(to.exists());
        assert!(!from.exists());
    }
}
