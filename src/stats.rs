// src/stats.rs

use std::fmt;

/// Additive counters for one job (or, via `add`, a whole run). The balance
/// invariant ties them together: every input row is either skipped, filtered,
/// or carried through to exactly one terminal outcome.
#[derive(Debug, Default, Clone)]
pub struct RunStats {
    pub rows_read: u64,
    pub skipped_invalid: u64,
    pub filtered_out: u64,
    pub matched: u64,
    pub unmatched: u64,
    pub failed: u64,
    pub batches_executed: u64,
    pub batches_abandoned: u64,
    pub flushes: u64,
    pub elapsed_ms: u64,
}

impl RunStats {
    pub fn add(&mut self, other: &RunStats) {
        self.rows_read += other.rows_read;
        self.skipped_invalid += other.skipped_invalid;
        self.filtered_out += other.filtered_out;
        self.matched += other.matched;
        self.unmatched += other.unmatched;
        self.failed += other.failed;
        self.batches_executed += other.batches_executed;
        self.batches_abandoned += other.batches_abandoned;
        self.flushes += other.flushes;
        self.elapsed_ms += other.elapsed_ms;
    }

    /// Rows that produced an output row.
    pub fn rows_resolved(&self) -> u64 {
        self.matched + self.unmatched + self.failed
    }

    /// Share of resolved rows that found a facility. Abandoned rows (run
    /// aborted mid-flight) are excluded from the denominator.
    pub fn match_rate(&self) -> f64 {
        let resolved = self.rows_resolved();
        if resolved == 0 {
            return 0.0;
        }
        self.matched as f64 / resolved as f64
    }

    /// True when every read row is accounted for. Fails only when the run
    /// aborted with batches still in flight.
    pub fn is_balanced(&self) -> bool {
        self.rows_read == self.skipped_invalid + self.filtered_out + self.rows_resolved()
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "read={} skipped={} filtered={} matched={} unmatched={} failed={} \
             batches={} abandoned={} flushes={} match_rate={:.1}% elapsed={}ms",
            self.rows_read,
            self.skipped_invalid,
            self.filtered_out,
            self.matched,
            self.unmatched,
            self.failed,
            self.batches_executed,
            self.batches_abandoned,
            self.flushes,
            self.match_rate() * 100.0,
            self.elapsed_ms
        )
    }
}
