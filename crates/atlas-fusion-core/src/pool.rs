//! Bounded batch pool.
//!
//! Jobs are launched in consecutive batches of at most `limit` jobs. All jobs
//! of a batch run concurrently as tokio tasks; the next batch starts only once
//! every job of the current batch has finished, whatever its outcome. Freed
//! slots are not refilled mid-batch.

use std::future::Future;
use std::path::PathBuf;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::obs;
use crate::toolkit::ToolRun;

/// Result of one job submitted to a [`BatchPool`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome<T> {
    /// Position of the job in the submitted list.
    pub index: usize,
    /// Zero-based batch the job ran in.
    pub batch: usize,
    /// Job output, `None` if the task panicked.
    pub value: Option<T>,
}

/// Batched-barrier scheduler with a fixed concurrency limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPool {
    limit: usize,
}

impl BatchPool {
    /// A pool running at most `limit` jobs at once. A zero limit is treated as one.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Sizes of the batches `pending` jobs are split into.
    pub fn batch_sizes(&self, pending: usize) -> Vec<usize> {
        let mut sizes = Vec::new();
        let mut remaining = pending;
        while remaining > 0 {
            let size = remaining.min(self.limit);
            sizes.push(size);
            remaining -= size;
        }
        sizes
    }

    /// Run `jobs` through `f` batch by batch.
    ///
    /// Outcomes are returned in submission order.
    pub async fn run<J, T, F, Fut>(&self, label: &str, jobs: Vec<J>, f: F) -> Vec<JobOutcome<T>>
    where
        F: Fn(J) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let total = jobs.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut jobs = jobs.into_iter().enumerate().peekable();
        let mut batch = 0usize;

        while jobs.peek().is_some() {
            let mut handles = Vec::with_capacity(self.limit);
            let mut indices = Vec::with_capacity(self.limit);
            for (index, job) in jobs.by_ref().take(self.limit) {
                indices.push(index);
                handles.push(tokio::spawn(f(job)));
            }

            obs::emit_batch_started(label, batch, handles.len(), total);
            let results = join_all(handles).await;

            for (index, result) in indices.into_iter().zip(results) {
                let value = match result {
                    Ok(v) => Some(v),
                    Err(e) => {
                        warn!(stage = label, job = index, error = %e, "job task did not complete");
                        None
                    }
                };
                outcomes.push(JobOutcome {
                    index,
                    batch,
                    value,
                });
            }
            obs::emit_batch_finished(label, batch);
            batch += 1;
        }

        outcomes
    }
}

/// What one scheduled pass of collaborator jobs achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Jobs launched.
    pub issued: usize,
    /// Batches the jobs were split into.
    pub batches: usize,
    /// Jobs whose expected output exists afterwards.
    pub produced: usize,
    /// Jobs that exited non-zero or could not be run.
    pub failed_exits: usize,
}

impl BatchReport {
    /// Tally tool outcomes against their expected outputs.
    ///
    /// `expected[i]` is the output of the job submitted at index `i`. A
    /// failing exit is only logged; whether the output exists is what counts.
    pub fn tally(
        stage: &str,
        outcomes: &[JobOutcome<Result<ToolRun>>],
        expected: &[PathBuf],
    ) -> Self {
        let mut report = BatchReport {
            issued: outcomes.len(),
            batches: outcomes.iter().map(|o| o.batch + 1).max().unwrap_or(0),
            ..Default::default()
        };
        for outcome in outcomes {
            let output = &expected[outcome.index];
            match &outcome.value {
                Some(Ok(run)) if run.passed() => {}
                Some(Ok(run)) => {
                    report.failed_exits += 1;
                    debug!(
                        stage = stage,
                        tool = %run.tool,
                        exit_code = run.exit_code,
                        output = %output.display(),
                        "tool exited with failure"
                    );
                }
                Some(Err(e)) => {
                    report.failed_exits += 1;
                    warn!(stage = stage, output = %output.display(), error = %e, "tool could not be run");
                }
                None => report.failed_exits += 1,
            }
            if output.exists() {
                report.produced += 1;
            } else {
                warn!(stage = stage, output = %output.display(), "expected output missing after job");
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Mark {
        Start(usize),
        End(usize),
    }

    #[test]
    fn test_batch_sizes() {
        assert_eq!(BatchPool::new(2).batch_sizes(5), vec![2, 2, 1]);
        assert_eq!(BatchPool::new(4).batch_sizes(2), vec![2]);
        assert_eq!(BatchPool::new(3).batch_sizes(0), Vec::<usize>::new());
        assert_eq!(BatchPool::new(0).limit(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_batch_waits_for_slowest_job() {
        let marks = Arc::new(Mutex::new(Vec::new()));
        // Job 0 is slow, job 1 is fast: a refilling pool would start job 2
        // before job 0 ends.
        let delays = vec![50u64, 5, 5, 5, 5];

        let pool = BatchPool::new(2);
        let outcomes = pool
            .run("test", delays.into_iter().enumerate().collect(), |(i, delay)| {
                let marks = Arc::clone(&marks);
                async move {
                    marks.lock().unwrap().push(Mark::Start(i));
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    marks.lock().unwrap().push(Mark::End(i));
                    i * 10
                }
            })
            .await;

        let batches: Vec<usize> = outcomes.iter().map(|o| o.batch).collect();
        assert_eq!(batches, vec![0, 0, 1, 1, 2]);
        let values: Vec<_> = outcomes.iter().map(|o| o.value).collect();
        assert_eq!(
            values,
            vec![Some(0), Some(10), Some(20), Some(30), Some(40)]
        );

        let marks = marks.lock().unwrap().clone();
        let pos = |m: Mark| marks.iter().position(|x| *x == m).unwrap();
        for later in 2..4 {
            assert!(pos(Mark::Start(later)) > pos(Mark::End(0)));
            assert!(pos(Mark::Start(later)) > pos(Mark::End(1)));
        }
        assert!(pos(Mark::Start(4)) > pos(Mark::End(2)));
        assert!(pos(Mark::Start(4)) > pos(Mark::End(3)));
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stop_batch() {
        let pool = BatchPool::new(3);
        let outcomes = pool
            .run("test", vec![1, 0, 2], |n| async move {
                if n == 0 {
                    panic!("job failed");
                }
                n
            })
            .await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].value, Some(1));
        assert_eq!(outcomes[1].value, None);
        assert_eq!(outcomes[2].value, Some(2));
    }
}
