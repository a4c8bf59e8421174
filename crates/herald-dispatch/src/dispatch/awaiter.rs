use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

use herald_core::error::Result;

use super::report::DispatchReport;

/// Result of waiting on command handler tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwaitOutcome {
    /// Every handler task finished before the deadline.
    pub settled: bool,
    pub completed: usize,
    pub failed: usize,
}

/// Returned by `dispatch_command`: the dispatch report plus the handler tasks
/// it started. Waiting is advisory; a timeout leaves the tasks running.
pub struct CommandAwaiter {
    report: DispatchReport,
    tasks: Vec<JoinHandle<Result<()>>>,
    default_timeout: Duration,
}

impl CommandAwaiter {
    pub(crate) fn new(report: DispatchReport, tasks: Vec<JoinHandle<Result<()>>>, default_timeout: Duration) -> Self {
        Self {
            report,
            tasks,
            default_timeout,
        }
    }

    pub fn report(&self) -> &DispatchReport {
        &self.report
    }

    pub fn into_report(self) -> DispatchReport {
        self.report
    }

    /// Handler tasks not finished yet.
    pub fn pending(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }

    /// Wait up to `limit` (default from settings) for the handler tasks.
    pub async fn wait_for_handlers(mut self, limit: Option<Duration>) -> AwaitOutcome {
        let deadline = Instant::now() + limit.unwrap_or(self.default_timeout);
        let total = self.tasks.len();
        let mut completed = 0;
        let mut failed = 0;

        for task in self.tasks.iter_mut() {
            match timeout_at(deadline, task).await {
                Ok(Ok(Ok(()))) => completed += 1,
                Ok(Ok(Err(_))) | Ok(Err(_)) => {
                    completed += 1;
                    failed += 1;
                }
                Err(_) => {
                    tracing::debug!(
                        pending = total - completed,
                        "command handlers still running after await timeout"
                    );
                    return AwaitOutcome {
                        settled: false,
                        completed,
                        failed,
                    };
                }
            }
        }

        AwaitOutcome {
            settled: true,
            completed,
            failed,
        }
    }
}
