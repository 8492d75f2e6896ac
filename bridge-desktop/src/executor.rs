//! UI Dispatch Thread
//!
//! Desktop hosts without their own event loop get a single dispatcher
//! thread. Jobs run one at a time in post order.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use bridge_traits::{UiExecutor, UiJob};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, warn};

/// [`UiExecutor`] backed by a dedicated `ui-dispatch` thread.
///
/// The thread exits once the executor is dropped and every queued job has
/// run.
#[derive(Debug, Clone)]
pub struct ThreadUiExecutor {
    jobs: UnboundedSender<UiJob>,
}

impl ThreadUiExecutor {
    pub fn spawn() -> std::io::Result<Self> {
        let (jobs, mut queue) = mpsc::unbounded_channel::<UiJob>();

        thread::Builder::new()
            .name("ui-dispatch".to_string())
            .spawn(move || {
                while let Some(job) = queue.blocking_recv() {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        warn!("UI job panicked");
                    }
                }
                debug!("UI dispatch thread stopped");
            })?;

        Ok(Self { jobs })
    }
}

impl UiExecutor for ThreadUiExecutor {
    fn post(&self, job: UiJob) {
        if self.jobs.send(job).is_err() {
            warn!("UI dispatch thread is gone, dropping job");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_in_order_off_the_caller_thread() {
        let executor = ThreadUiExecutor::spawn().unwrap();
        let caller = thread::current().id();
        let (tx, rx) = std_mpsc::channel();

        for i in 0..5 {
            let tx = tx.clone();
            executor.post(Box::new(move || {
                tx.send((i, thread::current().id())).unwrap();
            }));
        }

        let received: Vec<_> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(
            received.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4]
        );
        assert!(received.iter().all(|(_, id)| *id != caller));
    }

    #[test]
    fn test_panicking_job_does_not_stop_dispatch() {
        let executor = ThreadUiExecutor::spawn().unwrap();
        let (tx, rx) = std_mpsc::channel();

        executor.post(Box::new(|| panic!("listener bug")));
        executor.post(Box::new(move || tx.send(()).unwrap()));

        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }
}
