//! WAL directory: logfile inventory, recovery driver and lifecycle queries.
//!
//! ```text
//! <wal_dir>/
//! ├─ LOCK              # Advisory lock for single-writer
//! ├─ logfile-17.db     # Logfiles, named by id
//! └─ logfile-52.db
//! ```

use super::logfile::{LogfileId, LogfileStatus, WalLogfile};
use super::recovery::{RecoverState, ReplayTarget};
use crate::context::EngineContext;
use crate::datafile::{fid_from_path, Datafile, Judgement};
use crate::error::{CoreError, CoreResult};
use crate::marker::JOURNAL_OVERHEAD;
use crate::types::Tick;
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const LOCK_FILE: &str = "LOCK";
const LOGFILE_PREFIX: &str = "logfile-";
const LOGFILE_EXTENSION: &str = "db";

/// The logfiles of one WAL directory.
///
/// Holds an exclusive lock on the directory for its whole lifetime, so only
/// one `WalDirectory` can exist per directory at a time.
#[derive(Debug)]
pub struct WalDirectory {
    ctx: EngineContext,
    path: PathBuf,
    logfiles: RwLock<BTreeMap<LogfileId, Arc<WalLogfile>>>,
    last_sealed_id: AtomicU64,
    last_opened_id: AtomicU64,
    _lock_file: File,
}

impl WalDirectory {
    /// Opens or creates a WAL directory and locks it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the directory doesn't exist and `create_if_missing` is false
    /// - another handle holds the lock ([`CoreError::DirectoryLocked`])
    /// - I/O errors occur
    pub fn open(ctx: &EngineContext, path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path).map_err(CoreError::from_io)?;
            } else {
                return Err(CoreError::illegal_state(format!(
                    "WAL directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::illegal_state(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))
            .map_err(CoreError::from_io)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DirectoryLocked {
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            ctx: ctx.clone(),
            path: path.to_path_buf(),
            logfiles: RwLock::new(BTreeMap::new()),
            last_sealed_id: AtomicU64::new(0),
            last_opened_id: AtomicU64::new(0),
            _lock_file: lock_file,
        })
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the logfile with the given id.
    #[must_use]
    pub fn logfile_path(&self, id: LogfileId) -> PathBuf {
        self.path
            .join(format!("{LOGFILE_PREFIX}{id}.{LOGFILE_EXTENSION}"))
    }

    /// Lists the logfiles on disk in id order.
    ///
    /// Files with id 0 are skipped. The tick clock is raised past the
    /// largest id, since logfile ids are ticks.
    ///
    /// # Errors
    ///
    /// Returns the error of reading the directory.
    pub fn inventory(&self) -> CoreResult<Vec<(LogfileId, PathBuf)>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.path).map_err(CoreError::from_io)? {
            let path = entry.map_err(CoreError::from_io)?.path();
            let is_logfile = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(LOGFILE_PREFIX))
                && path.extension().is_some_and(|e| e == LOGFILE_EXTENSION);
            if !is_logfile {
                continue;
            }
            match fid_from_path(&path) {
                Some(0) => warn!(path = %path.display(), "ignoring logfile with invalid id 0"),
                Some(id) => found.push((id, path)),
                None => debug!(path = %path.display(), "ignoring unrecognized file"),
            }
        }
        found.sort_unstable();

        if let Some((id, _)) = found.last() {
            self.ctx.ticks().observe(*id);
        }
        Ok(found)
    }

    /// First recovery pass over every logfile on disk.
    ///
    /// Empty logfiles are queued for removal. Others are opened and, if OPEN
    /// or SEALED, scanned with [`RecoverState::initial_scan_marker`] and
    /// queued for replay. Logfiles up to `last_collected_id` are known to be
    /// collected already.
    ///
    /// # Errors
    ///
    /// Returns the open error of a logfile unless logfile errors are
    /// ignored, or [`CoreError::Recovery`] if a logfile cannot be scanned.
    pub fn inspect_logfiles(
        &self,
        state: &mut RecoverState,
        last_collected_id: LogfileId,
    ) -> CoreResult<()> {
        let ignore_errors = self.ctx.config().ignore_logfile_errors;

        for (id, path) in self.inventory()? {
            if Datafile::judge(&path) == Judgement::Empty {
                debug!(logfile = id, "found empty logfile");
                state.empty_logfiles.push(path);
                continue;
            }

            let logfile = match WalLogfile::open_existing(
                &self.ctx,
                &path,
                id,
                id <= last_collected_id,
                ignore_errors,
            ) {
                Ok(logfile) => logfile,
                Err(e) if ignore_errors => {
                    warn!(logfile = id, error = %e, "ignoring logfile that cannot be opened");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let status = logfile.status();
            if status == LogfileStatus::Sealed {
                self.last_sealed_id.fetch_max(id, Ordering::AcqRel);
            }
            self.last_opened_id.fetch_max(id, Ordering::AcqRel);

            if matches!(status, LogfileStatus::Open | LogfileStatus::Sealed) {
                let scanned = logfile
                    .datafile_mut()
                    .iterate(|_, marker| state.initial_scan_marker(marker));
                if !scanned {
                    return Err(CoreError::recovery(format!(
                        "cannot scan logfile {}",
                        path.display()
                    )));
                }
                state.logfiles_to_process.push(Arc::clone(&logfile));
            }

            self.logfiles.write().insert(id, logfile);
        }

        self.ctx.ticks().observe(state.last_tick);
        info!(
            logfiles = state.logfiles_to_process.len(),
            empty = state.empty_logfiles.len(),
            last_tick = state.last_tick,
            failed_transactions = state.failed_transactions.len(),
            "inspected WAL logfiles"
        );
        Ok(())
    }

    /// Second recovery pass: replays every queued logfile in order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Recovery`] if replay of a logfile stopped.
    pub fn run_recovery(
        &self,
        state: &mut RecoverState,
        target: &mut dyn ReplayTarget,
    ) -> CoreResult<()> {
        if !state.must_replay() {
            debug!("nothing to replay");
            return Ok(());
        }

        let logfiles = state.logfiles_to_process.clone();
        for logfile in &logfiles {
            info!(logfile = logfile.id(), "replaying logfile");
            let replayed = logfile
                .datafile_mut()
                .iterate(|_, marker| state.replay_marker(marker, &mut *target));
            if !replayed {
                return Err(CoreError::recovery(format!(
                    "replay of logfile {} failed after {} errors",
                    logfile.id(),
                    state.error_count
                )));
            }
        }
        info!(errors = state.error_count, "WAL replay finished");
        Ok(())
    }

    /// Ends recovery: OPEN logfiles are marked SEALED so they get
    /// collected, empty logfiles are removed and the per-run state is
    /// released.
    pub fn finish_recovery(&self, state: &mut RecoverState) {
        for logfile in self.logfiles.read().values() {
            if logfile.status() == LogfileStatus::Open {
                logfile.force_status(LogfileStatus::Sealed);
                self.last_sealed_id.fetch_max(logfile.id(), Ordering::AcqRel);
            }
        }
        let removed = state.remove_empty_logfiles();
        state.release_resources();
        debug!(removed, "recovery finished");
    }

    /// Creates a logfile able to hold at least a `size`-byte marker and
    /// moves it to OPEN.
    ///
    /// # Errors
    ///
    /// Propagates errors from creating the file or writing its header.
    pub fn create_logfile(&self, size: u32) -> CoreResult<Arc<WalLogfile>> {
        let id = self.ctx.ticks().next();
        let size = self
            .ctx
            .config()
            .logfile_size
            .max(size.saturating_add(JOURNAL_OVERHEAD));
        let logfile = WalLogfile::create_new(&self.ctx, &self.logfile_path(id), id, size)?;
        logfile.write_header()?;

        self.logfiles.write().insert(id, Arc::clone(&logfile));
        self.last_opened_id.fetch_max(id, Ordering::AcqRel);
        info!(logfile = id, size, "created new logfile");
        Ok(logfile)
    }

    /// Looks up a loaded logfile.
    #[must_use]
    pub fn logfile(&self, id: LogfileId) -> Option<Arc<WalLogfile>> {
        self.logfiles.read().get(&id).cloned()
    }

    /// All loaded logfiles in id order.
    #[must_use]
    pub fn logfiles(&self) -> Vec<Arc<WalLogfile>> {
        self.logfiles.read().values().cloned().collect()
    }

    /// The oldest logfile the collector may process.
    #[must_use]
    pub fn collectable_logfile(&self, released_tick: Tick) -> Option<Arc<WalLogfile>> {
        self.logfiles
            .read()
            .values()
            .find(|l| l.can_be_collected(released_tick))
            .cloned()
    }

    /// The oldest logfile that can be deleted.
    #[must_use]
    pub fn removable_logfile(&self) -> Option<Arc<WalLogfile>> {
        self.logfiles
            .read()
            .values()
            .find(|l| l.can_be_removed())
            .cloned()
    }

    /// Unloads and deletes a logfile.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalState`] if the logfile cannot be removed
    /// yet, or the I/O error of deleting it.
    pub fn remove_logfile(&self, id: LogfileId) -> CoreResult<bool> {
        let logfile = {
            let mut logfiles = self.logfiles.write();
            match logfiles.get(&id) {
                None => return Ok(false),
                Some(l) if !l.can_be_removed() => {
                    return Err(CoreError::illegal_state(format!(
                        "logfile {id} is {} and cannot be removed",
                        l.status()
                    )));
                }
                Some(_) => logfiles.remove(&id),
            }
        };
        if let Some(logfile) = logfile {
            logfile.datafile_mut().close()?;
        }
        fs::remove_file(self.logfile_path(id)).map_err(CoreError::from_io)?;
        info!(logfile = id, "removed logfile");
        Ok(true)
    }

    /// Id of the newest SEALED logfile.
    #[must_use]
    pub fn last_sealed_id(&self) -> LogfileId {
        self.last_sealed_id.load(Ordering::Acquire)
    }

    /// Id of the newest loaded logfile.
    #[must_use]
    pub fn last_opened_id(&self) -> LogfileId {
        self.last_opened_id.load(Ordering::Acquire)
    }
}
