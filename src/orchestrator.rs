// src/orchestrator.rs

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};

use crate::accumulator::ResultAccumulator;
use crate::config::MatcherConfig;
use crate::dispatch::split_into_batches;
use crate::executor::ConcurrencyController;
use crate::models::{MatchOutcome, PlaceType};
use crate::reader::ChunkReader;
use crate::retry::RetryPolicy;
use crate::search::GeoSearchClient;
use crate::stats::RunStats;

/// One matching pass: an input point dataset, the facility category to match
/// against, and where the NDJSON results land.
#[derive(Debug, Clone)]
pub struct MatchJob {
    pub place_type: PlaceType,
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Drives jobs end to end: chunked read, batch dispatch through the worker
/// pool, and durable incremental output. Holds one shared search client and
/// one breaker across all jobs of a run.
pub struct MatchRunner {
    config: MatcherConfig,
    client: Arc<dyn GeoSearchClient>,
    policy: Arc<RetryPolicy>,
    controller: ConcurrencyController,
}

impl MatchRunner {
    pub fn new(config: MatcherConfig, client: Arc<dyn GeoSearchClient>) -> Self {
        let policy = Arc::new(RetryPolicy::new(
            config.max_retries,
            config.base_retry_delay_ms,
        ));
        let controller = ConcurrencyController::new(
            config.pool_size,
            config.breaker_threshold,
            Duration::from_secs(config.drain_grace_secs),
        );
        Self {
            config,
            client,
            policy,
            controller,
        }
    }

    /// Run every job in order, stopping at the first aborted one. Partial
    /// output of an aborted job stays on disk.
    pub async fn run_jobs(&self, jobs: &[MatchJob]) -> Result<RunStats> {
        let run_id = uuid::Uuid::new_v4();
        let started_at = chrono::Utc::now();
        info!(
            "Run {} started at {} with {} job(s)",
            run_id,
            started_at.to_rfc3339(),
            jobs.len()
        );

        let mut total = RunStats::default();
        for (i, job) in jobs.iter().enumerate() {
            info!(
                "Job {}/{}: {} matching, {} -> {}",
                i + 1,
                jobs.len(),
                job.place_type,
                job.input.display(),
                job.output.display()
            );
            let stats = self.run_job(job).await.with_context(|| {
                format!("Job {} ({} matching) failed", i + 1, job.place_type)
            })?;
            total.add(&stats);
        }

        info!("Run {} finished: {}", run_id, total);
        Ok(total)
    }

    /// Execute one job. Returns the job's counters on completion; on a fatal
    /// backend failure the buffered results are flushed before the error
    /// propagates.
    pub async fn run_job(&self, job: &MatchJob) -> Result<RunStats> {
        let started = Instant::now();
        self.controller.reset_breaker();
        let mut reader =
            ChunkReader::open(&job.input, job.place_type, self.config.chunk_size)?;
        let mut accumulator =
            ResultAccumulator::create(&job.output, self.config.flush_threshold)?;
        let mut stats = RunStats::default();
        let categories = [job.place_type];

        while let Some(chunk) = reader.next_chunk()? {
            let batches = split_into_batches(
                &chunk,
                &categories,
                &self.config.radius,
                self.config.batch_size,
            );
            // The chunk is no longer needed once expanded into queries.
            drop(chunk);

            let (mut rx, handle) =
                self.controller
                    .run(self.client.clone(), self.policy.clone(), batches);

            while let Some(completion) = rx.recv().await {
                stats.batches_executed += 1;
                for result in completion.results {
                    match &result.outcome {
                        MatchOutcome::Matched(_) => stats.matched += 1,
                        MatchOutcome::Unmatched => stats.unmatched += 1,
                        MatchOutcome::Failed(_) => stats.failed += 1,
                    }
                    accumulator.add(result)?;
                }
            }

            let report = handle.await.context("Batch execution task panicked")?;
            stats.batches_abandoned += report.batches_abandoned as u64;

            if let Some(cause) = report.aborted {
                accumulator.flush()?;
                self.finalize(&mut stats, &reader, &accumulator, started);
                error!(
                    "{} matching aborted after {} flushed row(s): {}",
                    job.place_type,
                    accumulator.rows_written(),
                    cause
                );
                return Err(anyhow!(
                    "Aborted on fatal backend failure ({}); {} row(s) preserved in {}",
                    cause,
                    accumulator.rows_written(),
                    job.output.display()
                ));
            }
        }

        accumulator.flush()?;
        self.finalize(&mut stats, &reader, &accumulator, started);

        if !stats.is_balanced() {
            warn!(
                "Row accounting is off for {} matching: {}",
                job.place_type, stats
            );
        }
        info!("{} matching done: {}", job.place_type, stats);
        Ok(stats)
    }

    fn finalize<R: std::io::BufRead>(
        &self,
        stats: &mut RunStats,
        reader: &ChunkReader<R>,
        accumulator: &ResultAccumulator,
        started: Instant,
    ) {
        stats.rows_read = reader.rows_read();
        stats.skipped_invalid = reader.skipped_invalid();
        stats.filtered_out = reader.filtered_out();
        stats.flushes = accumulator.flushes();
        stats.elapsed_ms = started.elapsed().as_millis() as u64;
    }
}
