// src/accumulator.rs

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};

use crate::models::MatchResult;

/// Buffers completed results in arrival order and appends them to the output
/// file as NDJSON once the buffer reaches the flush threshold. The final
/// flush at stream end (and the best-effort flush on abort) is the caller's
/// responsibility via `flush()`.
///
/// Once `add` accepts a result it is never dropped: it either sits in the
/// buffer or has been written, and it is written exactly once.
pub struct ResultAccumulator {
    writer: BufWriter<File>,
    path: PathBuf,
    buffer: Vec<MatchResult>,
    flush_threshold: usize,
    rows_written: u64,
    flushes: u64,
}

impl ResultAccumulator {
    pub fn create(path: &Path, flush_threshold: usize) -> Result<Self> {
        assert!(flush_threshold > 0, "flush threshold must be positive");
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create output directory {}", parent.display())
                })?;
            }
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            buffer: Vec::with_capacity(flush_threshold),
            flush_threshold,
            rows_written: 0,
            flushes: 0,
        })
    }

    pub fn add(&mut self, result: MatchResult) -> Result<()> {
        self.buffer.push(result);
        if self.buffer.len() >= self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Append the buffered rows to the output file and clear the buffer.
    /// Idempotent on an empty buffer.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let count = self.buffer.len();
        for result in self.buffer.drain(..) {
            let row = result.to_row();
            serde_json::to_writer(&mut self.writer, &row).with_context(|| {
                format!("Failed to serialize output row for point {}", row.point_id)
            })?;
            self.writer
                .write_all(b"\n")
                .context("Failed to write output row terminator")?;
        }
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush output file {}", self.path.display()))?;

        self.rows_written += count as u64;
        self.flushes += 1;
        if self.flushes == 1 {
            info!(
                "First flush: {} row(s) written to {}",
                count,
                self.path.display()
            );
        } else {
            debug!("Flushed {} row(s) ({} total)", count, self.rows_written);
        }
        Ok(())
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }
}
