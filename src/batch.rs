//! Bounded parallel runner for independent per-item work.

use rayon::prelude::*;
use serde::Serialize;

use crate::error::{Error, Result};

/// Worker count used when none is configured.
pub const DEFAULT_WORKERS: usize = 3;

/// Result of one batch item. A failure is captured, never propagated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome<T> {
    Ok { id: String, result: T },
    Error { id: String, error: String },
}

impl<T> BatchOutcome<T> {
    pub fn id(&self) -> &str {
        match self {
            BatchOutcome::Ok { id, .. } | BatchOutcome::Error { id, .. } => id,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, BatchOutcome::Ok { .. })
    }
}

/// Run `f` over every id on a pool of `workers` threads (at least one).
///
/// Outcomes keep the input order. One item's error never cancels its
/// siblings.
pub fn run<T, F>(ids: &[String], workers: usize, f: F) -> Result<Vec<BatchOutcome<T>>>
where
    T: Send,
    F: Fn(&str) -> Result<T> + Sync,
{
    let workers = workers.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("docslice-batch-{i}"))
        .build()
        .map_err(|e| Error::Config(format!("failed to start batch pool: {e}")))?;

    let outcomes: Vec<BatchOutcome<T>> = pool.install(|| {
        ids.par_iter()
            .map(|id| match f(id) {
                Ok(result) => BatchOutcome::Ok {
                    id: id.clone(),
                    result,
                },
                Err(e) => {
                    tracing::debug!(id = %id, error = %e, "Batch item failed");
                    BatchOutcome::Error {
                        id: id.clone(),
                        error: e.to_string(),
                    }
                }
            })
            .collect()
    });

    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    tracing::info!(items = ids.len(), failed, workers, "Batch finished");
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("item-{i}")).collect()
    }

    #[test]
    fn keeps_input_order() {
        let input = ids(20);
        let outcomes = run(&input, DEFAULT_WORKERS, |id| Ok(id.len())).unwrap();
        let order: Vec<_> = outcomes.iter().map(|o| o.id().to_string()).collect();
        assert_eq!(order, input);
        assert!(outcomes.iter().all(BatchOutcome::is_ok));
    }

    #[test]
    fn failures_do_not_cancel_siblings() {
        let calls = AtomicUsize::new(0);
        let outcomes = run(&ids(6), 2, |id| {
            calls.fetch_add(1, Ordering::SeqCst);
            if id.ends_with('3') {
                Err(Error::EntryNotFound {
                    kind: "entry",
                    name: id.to_string(),
                })
            } else {
                Ok(())
            }
        })
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 5);
        match &outcomes[3] {
            BatchOutcome::Error { id, error } => {
                assert_eq!(id, "item-3");
                assert!(error.contains("not found"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn zero_workers_still_runs() {
        let outcomes = run(&ids(3), 0, |_| Ok(1)).unwrap();
        assert_eq!(outcomes.len(), 3);
    }

    #[test]
    fn outcome_serializes_with_status() {
        let ok: BatchOutcome<u8> = BatchOutcome::Ok {
            id: "a".into(),
            result: 1,
        };
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["result"], 1);
    }
}
