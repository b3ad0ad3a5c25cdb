// src/reader.rs

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;

use crate::models::{LocationPoint, PlaceType, PointId, RawPointRecord};

/// Streams the input point dataset in bounded windows of at most `chunk_size`
/// valid points. One NDJSON record per line; rows that fail to parse or carry
/// missing/non-finite coordinates are dropped and counted, never forwarded.
///
/// Forward-only: restarting means re-opening the source.
pub struct ChunkReader<R> {
    reader: R,
    chunk_size: usize,
    place_type: PlaceType,
    line_buf: String,
    rows_read: u64,
    skipped_invalid: u64,
    filtered_out: u64,
    done: bool,
}

impl ChunkReader<BufReader<File>> {
    pub fn open(path: &Path, place_type: PlaceType, chunk_size: usize) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open input file {}", path.display()))?;
        Ok(Self::new(BufReader::new(file), place_type, chunk_size))
    }
}

impl<R: BufRead> ChunkReader<R> {
    pub fn new(reader: R, place_type: PlaceType, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        Self {
            reader,
            chunk_size,
            place_type,
            line_buf: String::new(),
            rows_read: 0,
            skipped_invalid: 0,
            filtered_out: 0,
            done: false,
        }
    }

    /// Next window of valid points, or `None` at end of stream.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<LocationPoint>>> {
        if self.done {
            return Ok(None);
        }

        let mut chunk = Vec::with_capacity(self.chunk_size);
        while chunk.len() < self.chunk_size {
            self.line_buf.clear();
            let n = self
                .reader
                .read_line(&mut self.line_buf)
                .context("Failed to read input line")?;
            if n == 0 {
                self.done = true;
                break;
            }

            let line = self.line_buf.trim();
            if line.is_empty() {
                continue;
            }
            self.rows_read += 1;

            let record: RawPointRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(e) => {
                    self.skipped_invalid += 1;
                    debug!("Skipping unparseable input row {}: {}", self.rows_read, e);
                    continue;
                }
            };

            let (lat, lon) = match (record.lat, record.lon) {
                (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => (lat, lon),
                _ => {
                    self.skipped_invalid += 1;
                    debug!(
                        "Skipping row {} with missing or non-finite coordinates",
                        record.id
                    );
                    continue;
                }
            };

            // Company matching only considers daytime locations; other rows
            // would pair people with places they merely sleep near.
            if self.place_type == PlaceType::Company {
                if record.time_type.as_deref() != Some("DAY") {
                    self.filtered_out += 1;
                    continue;
                }
            }

            chunk.push(LocationPoint {
                id: PointId(record.id),
                lat,
                lon,
            });
        }

        if chunk.is_empty() {
            // Only reachable at end of stream: skipped rows never fill a chunk.
            return Ok(None);
        }

        Ok(Some(chunk))
    }

    /// All non-empty lines consumed so far.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Rows rejected for parse or coordinate validity.
    pub fn skipped_invalid(&self) -> u64 {
        self.skipped_invalid
    }

    /// Valid rows excluded by the category's row filter.
    pub fn filtered_out(&self) -> u64 {
        self.filtered_out
    }
}
