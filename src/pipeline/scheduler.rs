use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use crate::error::{ChunkFailure, TranslateError};
use crate::progress::{ProgressObserver, RunProgress};

pub const DEFAULT_CONCURRENCY: usize = 1;
pub const DEFAULT_INTER_BATCH_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_CHUNKS: usize = 50;

/// What to do once a chunk has failed terminally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop launching batches; the run fails as a whole.
    #[default]
    Abort,
    /// Keep going; the caller substitutes source values for failed chunks.
    KeepSource,
}

impl FailurePolicy {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "abort" | "fail_fast" => Ok(Self::Abort),
            "keep_source" | "partial" => Ok(Self::KeepSource),
            other => Err(anyhow::anyhow!("unknown failure policy: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SchedulePolicy {
    /// Batch width; 1 runs chunks strictly one after another.
    pub concurrency: usize,
    pub inter_batch_delay: Duration,
    /// Runs with more chunks are rejected before any call is made.
    pub max_chunks: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            inter_batch_delay: DEFAULT_INTER_BATCH_DELAY,
            max_chunks: DEFAULT_MAX_CHUNKS,
            failure_policy: FailurePolicy::Abort,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChunkResult<T> {
    Translated(T),
    Failed(ChunkFailure),
}

impl<T> ChunkResult<T> {
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScheduleReport<T> {
    /// One result per started chunk, in chunk order. Shorter than the chunk list when aborted.
    pub results: Vec<ChunkResult<T>>,
    /// Lowest-index terminal failure, if any.
    pub first_failure: Option<(usize, ChunkFailure)>,
    pub aborted: bool,
}

/// Reject runs above the chunk ceiling.
pub fn check_size(total: usize, policy: &SchedulePolicy) -> Result<(), TranslateError> {
    if total > policy.max_chunks {
        return Err(TranslateError::TooLarge {
            chunks: total,
            max_chunks: policy.max_chunks,
        });
    }
    Ok(())
}

/// Drive `op` over `chunks` in batches of `policy.concurrency`.
///
/// Results keep chunk order regardless of completion order. `observer` sees a `RunProgress` after
/// every finished chunk.
pub async fn run_all<'c, C, T, F, Fut>(
    chunks: &'c [C],
    policy: &SchedulePolicy,
    observer: &dyn ProgressObserver,
    op: F,
) -> Result<ScheduleReport<T>, TranslateError>
where
    F: Fn(usize, &'c C) -> Fut,
    Fut: Future<Output = Result<T, ChunkFailure>>,
{
    let total = chunks.len();
    check_size(total, policy)?;

    let width = policy.concurrency.max(1);
    let batches = total.div_ceil(width);
    let completed = AtomicUsize::new(0);
    let mut report = ScheduleReport {
        results: Vec::with_capacity(total),
        first_failure: None,
        aborted: false,
    };

    for (batch_no, batch) in chunks.chunks(width).enumerate() {
        let offset = batch_no * width;
        info!(
            batch = batch_no + 1,
            batches,
            chunks = batch.len(),
            "processing chunks {}-{} of {total}",
            offset + 1,
            offset + batch.len()
        );

        let futs = batch.iter().enumerate().map(|(i, chunk)| {
            let index = offset + i;
            let fut = op(index, chunk);
            let completed = &completed;
            async move {
                let res = fut.await;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                observer.on_progress(RunProgress {
                    completed_chunks: done,
                    total_chunks: total,
                });
                res
            }
        });
        let outcomes = join_all(futs).await;

        for (i, res) in outcomes.into_iter().enumerate() {
            let index = offset + i;
            match res {
                Ok(v) => report.results.push(ChunkResult::Translated(v)),
                Err(failure) => {
                    warn!(chunk = index + 1, total, "chunk failed: {failure}");
                    if report.first_failure.is_none() {
                        report.first_failure = Some((index, failure.clone()));
                    }
                    report.results.push(ChunkResult::Failed(failure));
                }
            }
        }

        if report.first_failure.is_some() && policy.failure_policy == FailurePolicy::Abort {
            report.aborted = batch_no + 1 < batches;
            return Ok(report);
        }

        if batch_no + 1 < batches && !policy.inter_batch_delay.is_zero() {
            tokio::time::sleep(policy.inter_batch_delay).await;
        }
    }
    Ok(report)
}
