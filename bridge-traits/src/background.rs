//! UI Thread Dispatch
//!
//! State-change notifications must reach listeners on the host's UI thread.
//! Instead of a process-wide dispatcher singleton, the core receives an
//! explicit [`UiExecutor`] handle and posts closures through it.

use crate::platform::PlatformSendSync;

/// Unit of work posted to the UI thread.
pub type UiJob = Box<dyn FnOnce() + Send + 'static>;

/// Posts work onto the host's UI thread.
///
/// # Platform Notes
///
/// - **Desktop**: a dedicated dispatcher thread or the windowing event loop
/// - **Tests**: [`ImmediateExecutor`] runs the job inline
///
/// # Example
///
/// ```ignore
/// executor.post(Box::new(move || listener(&state)));
/// ```
pub trait UiExecutor: PlatformSendSync {
    /// Queue `job`. Must not block the caller and must not run the job
    /// re-entrantly while the caller holds locks, unless documented.
    fn post(&self, job: UiJob);
}

/// Runs every job inline on the posting thread.
#[derive(Debug, Clone, Default)]
pub struct ImmediateExecutor;

impl UiExecutor for ImmediateExecutor {
    fn post(&self, job: UiJob) {
        job();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_immediate_executor_runs_inline() {
        let hits = Arc::new(AtomicUsize::new(0));
        let executor = ImmediateExecutor;

        for _ in 0..3 {
            let hits = hits.clone();
            executor.post(Box::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
