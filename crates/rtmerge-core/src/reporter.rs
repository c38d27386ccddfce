//! Reporter trait for dependency injection
//!
//! This trait allows the pipeline to report progress and status without
//! being coupled to a specific terminal implementation.

use rtmerge_schema::RuntimeId;

pub trait Reporter: Send + Sync {
    /// Indicates a new section or phase has started (e.g. "Fetching", "Patching").
    fn section(&self, title: &str);

    /// Updates the progress of an archive download.
    fn downloading(&self, runtime: &RuntimeId, current: u64, total: Option<u64>);

    /// Marks one variant's archive as fully read into memory.
    fn fetched(&self, runtime: &RuntimeId, size: u64);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a success message.
    fn success(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn downloading(&self, runtime: &RuntimeId, current: u64, total: Option<u64>) {
        (**self).downloading(runtime, current, total);
    }
    fn fetched(&self, runtime: &RuntimeId, size: u64) {
        (**self).fetched(runtime, size);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn success(&self, msg: &str) {
        (**self).success(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn error(&self, msg: &str) {
        (**self).error(msg);
    }
}

/// A no-op reporter for silent operations (e.g., library use, testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn downloading(&self, _: &RuntimeId, _: u64, _: Option<u64>) {}
    fn fetched(&self, _: &RuntimeId, _: u64) {}
    fn info(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
}
