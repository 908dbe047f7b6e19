//! Linear-scan ranking of stored encodings against a query embedding.

use serde::{Deserialize, Serialize};

use crate::encodings::records::EncodingSet;

/// A ranked match returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub label: String,
    /// Percentage derived as `100 - distance * 100`, rounded to two
    /// decimals. The transform assumes distances roughly in [0, 1] and is
    /// deliberately not clamped: a distance above 1.0 comes back negative.
    pub similarity: f32,
}

/// Errors that can occur during ranking.
#[derive(Debug, thiserror::Error)]
pub enum RankError {
    #[error("cannot rank against an empty corpus")]
    EmptyCorpus,

    #[error("dimension mismatch: query has {query}, corpus has {corpus}")]
    DimensionMismatch { query: usize, corpus: usize },
}

/// Rank every stored encoding by Euclidean distance to `query` and return
/// the closest `top_k` as similarity percentages.
///
/// Euclidean distance is the metric the face encoder's embedding space is
/// trained for; the two are a paired contract. The sort is stable, so
/// records at equal distance keep their insertion order. Pure function:
/// the same corpus and query always produce the same output.
pub fn rank(
    query: &[f32],
    corpus: &EncodingSet,
    top_k: usize,
) -> Result<Vec<FaceMatch>, RankError> {
    let dimensions = match corpus.dimensions() {
        Some(dimensions) => dimensions,
        None => return Err(RankError::EmptyCorpus),
    };
    if query.len() != dimensions {
        return Err(RankError::DimensionMismatch {
            query: query.len(),
            corpus: dimensions,
        });
    }

    let mut scored: Vec<(&str, f32)> = corpus
        .iter()
        .map(|record| (record.label.as_str(), euclidean_distance(query, &record.vector)))
        .collect();

    // Stable sort: ties keep insertion order
    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);

    Ok(scored
        .into_iter()
        .map(|(label, distance)| FaceMatch {
            label: label.to_string(),
            similarity: similarity_from_distance(distance),
        })
        .collect())
}

/// Euclidean distance between two equal-length vectors.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

fn similarity_from_distance(distance: f32) -> f32 {
    let raw = 100.0 - distance * 100.0;
    (raw * 100.0).round() / 100.0
}
