//! Engine configuration.

use crate::error::{CoreError, CoreResult};
use crate::marker::JOURNAL_OVERHEAD;

/// Default maximal size of a new collection datafile.
pub const DEFAULT_JOURNAL_SIZE: u32 = 32 * 1024 * 1024;

/// Default size of a new WAL logfile.
pub const DEFAULT_LOGFILE_SIZE: u32 = 32 * 1024 * 1024;

/// Largest marker the engine accepts.
#[cfg(target_pointer_width = "64")]
pub const DEFAULT_MAX_MARKER_SIZE: u32 = 256 * 1024 * 1024;

/// Largest marker the engine accepts.
#[cfg(not(target_pointer_width = "64"))]
pub const DEFAULT_MAX_MARKER_SIZE: u32 = 128 * 1024 * 1024;

/// Configuration shared by every datafile and logfile of one engine.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Maximal size of a new collection datafile (journal).
    pub journal_size: u32,

    /// Size of a new WAL logfile.
    pub logfile_size: u32,

    /// Truncate corrupt collection datafiles instead of failing
    /// (`--database.ignore-datafile-errors`).
    pub ignore_datafile_errors: bool,

    /// Truncate corrupt logfiles instead of failing
    /// (`--wal.ignore-logfile-errors`).
    pub ignore_logfile_errors: bool,

    /// Keep replaying after a marker could not be applied.
    pub ignore_recovery_errors: bool,

    /// Flush every written element immediately.
    pub force_sync: bool,

    /// Markers at or above this size are treated as corrupt.
    pub max_marker_size: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            journal_size: DEFAULT_JOURNAL_SIZE,
            logfile_size: DEFAULT_LOGFILE_SIZE,
            ignore_datafile_errors: false,
            ignore_logfile_errors: false,
            ignore_recovery_errors: false,
            force_sync: false,
            max_marker_size: DEFAULT_MAX_MARKER_SIZE,
        }
    }
}

impl StorageConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximal size of new collection datafiles.
    #[must_use]
    pub const fn journal_size(mut self, size: u32) -> Self {
        self.journal_size = size;
        self
    }

    /// Sets the size of new WAL logfiles.
    #[must_use]
    pub const fn logfile_size(mut self, size: u32) -> Self {
        self.logfile_size = size;
        self
    }

    /// Sets whether corrupt datafiles are truncated instead of rejected.
    #[must_use]
    pub const fn ignore_datafile_errors(mut self, value: bool) -> Self {
        self.ignore_datafile_errors = value;
        self
    }

    /// Sets whether corrupt logfiles are truncated instead of rejected.
    #[must_use]
    pub const fn ignore_logfile_errors(mut self, value: bool) -> Self {
        self.ignore_logfile_errors = value;
        self
    }

    /// Sets whether replay continues after a failed marker.
    #[must_use]
    pub const fn ignore_recovery_errors(mut self, value: bool) -> Self {
        self.ignore_recovery_errors = value;
        self
    }

    /// Sets whether every write is flushed immediately.
    #[must_use]
    pub const fn force_sync(mut self, value: bool) -> Self {
        self.force_sync = value;
        self
    }

    /// Sets the marker size ceiling.
    #[must_use]
    pub const fn max_marker_size(mut self, size: u32) -> Self {
        self.max_marker_size = size;
        self
    }

    /// Checks the sizes against the given page size.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MaximalSizeTooSmall`] if a journal or logfile could
    /// not hold a single page plus header and footer.
    pub fn validate(&self, page_size: usize) -> CoreResult<()> {
        let minimum = page_size as u64 + u64::from(JOURNAL_OVERHEAD);
        for requested in [self.journal_size, self.logfile_size] {
            if u64::from(requested) < minimum {
                return Err(CoreError::MaximalSizeTooSmall {
                    requested: u64::from(requested),
                    minimum,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StorageConfig::default();
        assert_eq!(config.journal_size, DEFAULT_JOURNAL_SIZE);
        assert!(!config.ignore_datafile_errors);
        assert!(!config.ignore_logfile_errors);
        assert!(!config.force_sync);
        assert!(config.validate(4096).is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = StorageConfig::new()
            .journal_size(1024 * 1024)
            .logfile_size(2 * 1024 * 1024)
            .ignore_logfile_errors(true)
            .force_sync(true);

        assert_eq!(config.journal_size, 1024 * 1024);
        assert_eq!(config.logfile_size, 2 * 1024 * 1024);
        assert!(config.ignore_logfile_errors);
        assert!(config.force_sync);
    }

    #[test]
    fn validate_rejects_tiny_sizes() {
        let config = StorageConfig::new().logfile_size(4096);
        assert!(matches!(
            config.validate(4096),
            Err(CoreError::MaximalSizeTooSmall { requested: 4096, .. })
        ));
    }
}
