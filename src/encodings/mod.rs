//! Face encoding persistence and ranking.
//!
//! # Architecture
//!
//! - `records`: the FaceRecord type and the ordered, dimension-checked
//!   EncodingSet corpus
//! - `store`: binary file I/O for faces.bin persistence
//! - `rank`: linear-scan Euclidean ranking with the similarity transform

mod rank;
mod records;
mod store;

pub use rank::{euclidean_distance, rank, FaceMatch, RankError};
pub use records::{EncodingSet, FaceRecord, RecordError};
pub use store::{EncodingStore, EncodingStoreError};

/// Default number of matches a comparison returns.
pub const DEFAULT_TOP_K: usize = 20;
