use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StrataError>;

/// The error kinds a `Strata` instance can surface.
///
/// Every variant maps to one of the error kinds in the design's error
/// handling section: corruption is fatal for the affected resource,
/// conflicts are retryable by the caller, configuration errors are only
/// ever raised at open time.
#[derive(Debug, Error)]
pub enum StrataError {
    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A page failed its checksum or structural validation on load.
    #[error("corrupt page: {0}")]
    CorruptPage(String),

    /// The journal contains a record that fails checksum, length, or
    /// ordering validation.
    #[error("corrupt journal: {0}")]
    CorruptJournal(String),

    /// The volume header or directory tree is structurally invalid.
    #[error("corrupt volume: {0}")]
    CorruptVolume(String),

    /// A buffer claim could not be acquired before its deadline.
    #[error("buffer claim timed out: {0}")]
    InUse(String),

    /// The volume cannot grow past its configured maximum size.
    #[error("volume full: {0}")]
    VolumeFull(String),

    /// The buffer pool has no frame available to satisfy a request.
    #[error("buffer pool exhausted: {0}")]
    BufferPoolExhausted(String),

    /// Two concurrent transactions wrote to the same key.
    #[error("write-write conflict on key held by transaction {0}")]
    WriteWriteConflict(u64),

    /// The transaction was unilaterally aborted (e.g. by deadlock
    /// resolution or an explicit `rollback`).
    #[error("transaction rolled back: {0}")]
    Rollback(String),

    /// A volume specification did not name enough information to open it.
    #[error("under-specified volume: {0}")]
    UnderSpecifiedVolume(String),

    /// A volume specification was internally inconsistent (e.g. an
    /// unsupported page size).
    #[error("invalid volume specification: {0}")]
    InvalidVolumeSpecification(String),

    /// No configured buffer pool matches the requested page size.
    #[error("no buffer pool sized for {0} bytes")]
    BufferSizeUnavailable(u32),

    /// The calling thread was interrupted while blocked in I/O.
    #[error("interrupted: {0}")]
    Interrupted(String),

    /// An internal invariant was violated; the instance is now poisoned.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl StrataError {
    /// `true` for errors that poison the owning [`crate::Strata`] context
    /// (everything except conflicts, timeouts, and configuration errors).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StrataError::CorruptPage(_)
                | StrataError::CorruptJournal(_)
                | StrataError::CorruptVolume(_)
                | StrataError::Fatal(_)
        )
    }
}

/// Latch that poisons a `Strata` context after a fatal error.
///
/// Once tripped, every subsequent call into the context returns the same
/// error until the process restarts (spec §7: "the instance transitions
/// to a poisoned state").
#[derive(Debug, Default)]
pub struct FatalLatch {
    tripped: AtomicBool,
    message: parking_lot::Mutex<Option<String>>,
}

impl FatalLatch {
    /// Creates a fresh, untripped latch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fatal error and poisons the context going forward.
    pub fn trip(&self, err: &StrataError) {
        if self.tripped.swap(true, Ordering::SeqCst) {
            return;
        }
        error!(error = %err, "context poisoned by fatal error");
        *self.message.lock() = Some(err.to_string());
    }

    /// Checks the latch, returning `Err(Fatal)` if it has been tripped.
    pub fn check(&self) -> Result<()> {
        if self.tripped.load(Ordering::SeqCst) {
            let message = self
                .message
                .lock()
                .clone()
                .unwrap_or_else(|| "poisoned".to_string());
            return Err(StrataError::Fatal(message));
        }
        Ok(())
    }

    /// Runs `f`, tripping the latch if it returns a fatal error.
    pub fn guard<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.check()?;
        match f() {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.is_fatal() {
                    self.trip(&err);
                }
                Err(err)
            }
        }
    }
}
