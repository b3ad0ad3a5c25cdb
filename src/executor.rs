// src/executor.rs

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{future, stream, StreamExt};
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SearchError;
use crate::models::Batch;
use crate::retry::{BatchCompletion, RetryPolicy};
use crate::search::GeoSearchClient;

/// What happened to one run of batches through the pool.
#[derive(Debug)]
pub struct ExecutionReport {
    pub batches_total: usize,
    pub batches_completed: usize,
    /// Batches neither completed nor submitted once the run aborted.
    pub batches_abandoned: usize,
    /// Set when the run stopped early on a fatal backend failure.
    pub aborted: Option<SearchError>,
}

/// Runs batches against the search client through a fixed-size worker pool,
/// publishing completions onto a bounded channel in arrival order. Completion
/// order may differ from submission order; every query is self-contained so
/// interleaving never affects per-point correctness.
///
/// A fatal classification (auth rejection, or `breaker_threshold` consecutive
/// connection-level batch failures) stops submission; in-flight batches may
/// drain for `drain_grace`, then the rest are abandoned with a logged
/// discrepancy.
pub struct ConcurrencyController {
    pool_size: usize,
    breaker_threshold: usize,
    drain_grace: Duration,
    // Persists across chunks so a flapping backend trips the breaker even
    // when failures straddle a chunk boundary. The runner resets it between
    // jobs so one job's tail of failures never counts against the next.
    consecutive_connect_failures: Arc<AtomicUsize>,
}

impl ConcurrencyController {
    pub fn new(pool_size: usize, breaker_threshold: usize, drain_grace: Duration) -> Self {
        assert!(pool_size > 0, "pool size must be positive");
        Self {
            pool_size,
            breaker_threshold,
            drain_grace,
            consecutive_connect_failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Clear the connectivity streak. Call at a boundary where earlier
    /// failures should no longer count toward the breaker.
    pub fn reset_breaker(&self) {
        self.consecutive_connect_failures.store(0, Ordering::SeqCst);
    }

    /// Submit `batches` and return the completion channel plus a handle that
    /// resolves to the run report once every completion has been published.
    pub fn run(
        &self,
        client: Arc<dyn GeoSearchClient>,
        policy: Arc<RetryPolicy>,
        batches: Vec<Batch>,
    ) -> (mpsc::Receiver<BatchCompletion>, JoinHandle<ExecutionReport>) {
        let (tx, rx) = mpsc::channel(self.pool_size);
        let pool_size = self.pool_size;
        let breaker_threshold = self.breaker_threshold;
        let drain_grace = self.drain_grace;
        let connect_failures = self.consecutive_connect_failures.clone();

        let handle = tokio::spawn(async move {
            let batches_total = batches.len();
            let stop = Arc::new(AtomicBool::new(false));

            let stop_source = stop.clone();
            let mut completions = stream::iter(batches)
                .take_while(move |_| future::ready(!stop_source.load(Ordering::SeqCst)))
                .map(|batch| {
                    let client = client.clone();
                    let policy = policy.clone();
                    async move { policy.run(client.as_ref(), &batch).await }
                })
                .buffer_unordered(pool_size);

            let mut batches_completed = 0usize;
            let mut aborted: Option<SearchError> = None;
            let mut drain_deadline = None;

            loop {
                let next = match drain_deadline {
                    None => completions.next().await,
                    Some(deadline) => {
                        match tokio::time::timeout_at(deadline, completions.next()).await {
                            Ok(next) => next,
                            Err(_) => {
                                warn!(
                                    "Drain grace of {:?} elapsed with {} batch(es) still in flight",
                                    drain_grace,
                                    batches_total - batches_completed
                                );
                                break;
                            }
                        }
                    }
                };
                let Some(completion) = next else { break };
                batches_completed += 1;

                let fatal = match &completion.batch_error {
                    Some(e) if e.is_fatal() => Some(e.clone()),
                    Some(e) if e.is_connectivity() => {
                        let streak = connect_failures.fetch_add(1, Ordering::SeqCst) + 1;
                        if streak >= breaker_threshold {
                            error!(
                                "{} consecutive connection-level batch failures, treating backend as down",
                                streak
                            );
                            Some(e.clone())
                        } else {
                            None
                        }
                    }
                    _ => {
                        connect_failures.store(0, Ordering::SeqCst);
                        None
                    }
                };

                if let Some(e) = fatal {
                    if aborted.is_none() {
                        error!("Fatal backend failure, stopping batch submission: {}", e);
                        aborted = Some(e);
                        stop.store(true, Ordering::SeqCst);
                        drain_deadline =
                            Some(tokio::time::Instant::now() + drain_grace);
                    }
                }

                // Receiver gone means the driving loop bailed; stop quietly.
                if tx.send(completion).await.is_err() {
                    break;
                }
            }

            let batches_abandoned = batches_total - batches_completed;
            if batches_abandoned > 0 {
                warn!(
                    "{} of {} batch(es) abandoned without a recorded result",
                    batches_abandoned, batches_total
                );
            } else {
                info!("All {} batch(es) completed", batches_total);
            }

            ExecutionReport {
                batches_total,
                batches_completed,
                batches_abandoned,
                aborted,
            }
        });

        (rx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        FacilityHit, MatchOutcome, MatchQuery, PlaceType, PointId, RegionCodes,
    };
    use crate::retry::BackoffFn;
    use async_trait::async_trait;
    use std::collections::HashSet;

    fn no_backoff_policy(max_retries: u32) -> Arc<RetryPolicy> {
        let backoff: BackoffFn = Box::new(|_| Duration::from_millis(0));
        Arc::new(RetryPolicy::with_backoff(max_retries, backoff))
    }

    fn batches(count: usize, per_batch: usize) -> Vec<Batch> {
        (0..count)
            .map(|b| Batch {
                queries: (0..per_batch)
                    .map(|i| MatchQuery {
                        point_id: PointId(format!("b{}q{}", b, i)),
                        lat: 37.0,
                        lon: 127.0,
                        place_type: PlaceType::HighSchool,
                        radius_m: 200,
                    })
                    .collect(),
            })
            .collect()
    }

    struct AlwaysHit;

    #[async_trait]
    impl GeoSearchClient for AlwaysHit {
        async fn execute(
            &self,
            batch: &Batch,
        ) -> Result<Vec<crate::search::QueryOutcome>, SearchError> {
            Ok(batch
                .queries
                .iter()
                .map(|_| {
                    crate::search::QueryOutcome::Hit(FacilityHit {
                        code: "F1".into(),
                        distance_m: 10.0,
                        region: RegionCodes::default(),
                        industry: None,
                    })
                })
                .collect())
        }
    }

    struct AlwaysRefused;

    #[async_trait]
    impl GeoSearchClient for AlwaysRefused {
        async fn execute(
            &self,
            _batch: &Batch,
        ) -> Result<Vec<crate::search::QueryOutcome>, SearchError> {
            Err(SearchError::Connect("connection refused".into()))
        }
    }

    struct AlwaysUnauthorized;

    #[async_trait]
    impl GeoSearchClient for AlwaysUnauthorized {
        async fn execute(
            &self,
            _batch: &Batch,
        ) -> Result<Vec<crate::search::QueryOutcome>, SearchError> {
            Err(SearchError::Auth(401))
        }
    }

    #[tokio::test]
    async fn every_query_is_recorded_exactly_once() {
        let controller = ConcurrencyController::new(4, 5, Duration::from_secs(5));
        let (mut rx, handle) =
            controller.run(Arc::new(AlwaysHit), no_backoff_policy(0), batches(6, 3));

        let mut seen = HashSet::new();
        while let Some(completion) = rx.recv().await {
            for result in completion.results {
                assert!(matches!(result.outcome, MatchOutcome::Matched(_)));
                assert!(seen.insert(result.point_id.0.clone()), "duplicate result");
            }
        }
        let report = handle.await.unwrap();
        assert_eq!(report.batches_completed, 6);
        assert_eq!(report.batches_abandoned, 0);
        assert!(report.aborted.is_none());
        assert_eq!(seen.len(), 18);
    }

    #[tokio::test]
    async fn connectivity_streak_trips_the_breaker() {
        let controller = ConcurrencyController::new(1, 2, Duration::from_millis(200));
        let (mut rx, handle) =
            controller.run(Arc::new(AlwaysRefused), no_backoff_policy(0), batches(10, 2));

        let mut completions = 0;
        while let Some(completion) = rx.recv().await {
            assert!(completion.batch_error.is_some());
            completions += 1;
        }
        let report = handle.await.unwrap();
        assert_eq!(report.aborted, Some(SearchError::Connect("connection refused".into())));
        assert!(report.batches_completed < report.batches_total);
        assert_eq!(
            report.batches_abandoned,
            report.batches_total - report.batches_completed
        );
        assert_eq!(completions, report.batches_completed);
    }

    #[tokio::test]
    async fn breaker_streak_restarts_after_reset() {
        let controller = ConcurrencyController::new(1, 2, Duration::from_millis(200));

        // One failure leaves the streak below the threshold of two.
        let (mut rx, handle) =
            controller.run(Arc::new(AlwaysRefused), no_backoff_policy(0), batches(1, 1));
        while rx.recv().await.is_some() {}
        assert!(handle.await.unwrap().aborted.is_none());

        controller.reset_breaker();

        // Without the reset this second failure would make it two in a row.
        let (mut rx, handle) =
            controller.run(Arc::new(AlwaysRefused), no_backoff_policy(0), batches(1, 1));
        while rx.recv().await.is_some() {}
        assert!(handle.await.unwrap().aborted.is_none());
    }

    #[tokio::test]
    async fn drain_grace_expiry_abandons_stuck_batches() {
        // First batch is rejected outright; the rest never come back.
        struct AuthThenHang;

        #[async_trait]
        impl GeoSearchClient for AuthThenHang {
            async fn execute(
                &self,
                batch: &Batch,
            ) -> Result<Vec<crate::search::QueryOutcome>, SearchError> {
                if batch.queries[0].point_id.0.starts_with("b0") {
                    Err(SearchError::Auth(401))
                } else {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(SearchError::Timeout)
                }
            }
        }

        let controller = ConcurrencyController::new(2, 100, Duration::from_millis(50));
        let (mut rx, handle) =
            controller.run(Arc::new(AuthThenHang), no_backoff_policy(0), batches(2, 1));

        let mut completions = 0;
        while rx.recv().await.is_some() {
            completions += 1;
        }
        let report = handle.await.unwrap();
        assert_eq!(report.aborted, Some(SearchError::Auth(401)));
        assert_eq!(report.batches_completed, 1);
        assert_eq!(report.batches_abandoned, 1);
        assert_eq!(completions, 1);
    }

    #[tokio::test]
    async fn auth_rejection_aborts_immediately() {
        let controller = ConcurrencyController::new(1, 100, Duration::from_millis(200));
        let (mut rx, handle) = controller.run(
            Arc::new(AlwaysUnauthorized),
            no_backoff_policy(3),
            batches(5, 1),
        );

        let mut completions = Vec::new();
        while let Some(completion) = rx.recv().await {
            completions.push(completion);
        }
        let report = handle.await.unwrap();
        assert_eq!(report.aborted, Some(SearchError::Auth(401)));
        // The first completion alone is enough to stop submission.
        assert!(report.batches_completed <= 2);
    }

    #[tokio::test]
    async fn single_failed_batch_does_not_stop_the_run() {
        struct OneBadBatch;

        #[async_trait]
        impl GeoSearchClient for OneBadBatch {
            async fn execute(
                &self,
                batch: &Batch,
            ) -> Result<Vec<crate::search::QueryOutcome>, SearchError> {
                if batch.queries[0].point_id.0.starts_with("b2") {
                    Err(SearchError::Status(400))
                } else {
                    AlwaysHit.execute(batch).await
                }
            }
        }

        let controller = ConcurrencyController::new(2, 5, Duration::from_secs(5));
        let (mut rx, handle) =
            controller.run(Arc::new(OneBadBatch), no_backoff_policy(0), batches(5, 2));

        let mut failed = 0;
        let mut matched = 0;
        while let Some(completion) = rx.recv().await {
            for result in completion.results {
                match result.outcome {
                    MatchOutcome::Matched(_) => matched += 1,
                    MatchOutcome::Failed(_) => failed += 1,
                    MatchOutcome::Unmatched => {}
                }
            }
        }
        let report = handle.await.unwrap();
        assert!(report.aborted.is_none());
        assert_eq!(report.batches_completed, 5);
        assert_eq!(failed, 2);
        assert_eq!(matched, 8);
    }
}
