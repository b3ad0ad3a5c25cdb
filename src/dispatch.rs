// src/dispatch.rs

use crate::config::RadiusTable;
use crate::models::{Batch, LocationPoint, MatchQuery, PlaceType};

/// Deterministically partitions a chunk into contiguous batches of at most
/// `batch_size` queries, preserving point order. With several categories the
/// same point expands into one independent query per category; the queries
/// are never merged.
pub fn split_into_batches(
    chunk: &[LocationPoint],
    categories: &[PlaceType],
    radius: &RadiusTable,
    batch_size: usize,
) -> Vec<Batch> {
    assert!(batch_size > 0, "batch size must be positive");

    let queries: Vec<MatchQuery> = chunk
        .iter()
        .flat_map(|point| {
            categories.iter().map(|&place_type| MatchQuery {
                point_id: point.id.clone(),
                lat: point.lat,
                lon: point.lon,
                place_type,
                radius_m: radius.radius_m(place_type),
            })
        })
        .collect();

    queries
        .chunks(batch_size)
        .map(|window| Batch {
            queries: window.to_vec(),
        })
        .collect()
}
