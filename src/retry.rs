// src/retry.rs

use std::time::Duration;

use log::{debug, warn};

use crate::error::SearchError;
use crate::models::{Batch, MatchOutcome, MatchResult};
use crate::search::{GeoSearchClient, QueryOutcome};

/// Backoff schedule between attempts; attempt numbering starts at 1 for the
/// first retry. Injectable so the policy is testable without real sleeps.
pub type BackoffFn = Box<dyn Fn(u32) -> Duration + Send + Sync>;

/// Exponential backoff doubling from a base delay: `base * 2^(attempt-1)`.
pub fn exponential_backoff(base_delay_ms: u64) -> BackoffFn {
    Box::new(move |attempt| Duration::from_millis(base_delay_ms * 2u64.pow(attempt - 1)))
}

/// Everything the executor needs to know about one finished batch: the
/// terminal per-query results, and the batch-level error (if any) that
/// produced them.
#[derive(Debug)]
pub struct BatchCompletion {
    pub results: Vec<MatchResult>,
    /// Set when the whole batch ended in a terminal failure; `None` when the
    /// round trip itself succeeded (individual queries may still have failed).
    pub batch_error: Option<SearchError>,
    pub attempts: u32,
}

/// Wraps a single batch execution with bounded retries. Retries are scoped
/// per batch, not per query, because the backend call is one multi-query
/// request. After exhausting retries every query in the batch yields a
/// failed MatchResult instead of aborting the run.
pub struct RetryPolicy {
    max_retries: u32,
    backoff: BackoffFn,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            backoff: exponential_backoff(base_delay_ms),
        }
    }

    pub fn with_backoff(max_retries: u32, backoff: BackoffFn) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub async fn run(&self, client: &dyn GeoSearchClient, batch: &Batch) -> BatchCompletion {
        let mut attempts = 0;
        let terminal_error = loop {
            attempts += 1;
            match client.execute(batch).await {
                Ok(outcomes) => {
                    return BatchCompletion {
                        results: results_from_outcomes(batch, outcomes),
                        batch_error: None,
                        attempts,
                    };
                }
                Err(e) if e.is_transient() && attempts <= self.max_retries => {
                    let delay = (self.backoff)(attempts);
                    warn!(
                        "Batch of {} queries failed transiently (attempt {}/{}): {}. Retrying in {:?}",
                        batch.len(),
                        attempts,
                        self.max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break e,
            }
        };

        debug!(
            "Batch of {} queries terminally failed after {} attempt(s): {}",
            batch.len(),
            attempts,
            terminal_error
        );

        let kind = terminal_error.failure_kind();
        let results = batch
            .queries
            .iter()
            .map(|query| MatchResult {
                point_id: query.point_id.clone(),
                lat: query.lat,
                lon: query.lon,
                place_type: query.place_type,
                outcome: MatchOutcome::Failed(kind),
            })
            .collect();

        BatchCompletion {
            results,
            batch_error: Some(terminal_error),
            attempts,
        }
    }
}

fn results_from_outcomes(batch: &Batch, outcomes: Vec<QueryOutcome>) -> Vec<MatchResult> {
    batch
        .queries
        .iter()
        .zip(outcomes)
        .map(|(query, outcome)| {
            let outcome = match outcome {
                QueryOutcome::Hit(hit) => MatchOutcome::Matched(hit),
                QueryOutcome::NoCandidate => MatchOutcome::Unmatched,
                QueryOutcome::Error(e) => MatchOutcome::Failed(e.failure_kind()),
            };
            MatchResult {
                point_id: query.point_id.clone(),
                lat: query.lat,
                lon: query.lon,
                place_type: query.place_type,
                outcome,
            }
        })
        .collect()
}
