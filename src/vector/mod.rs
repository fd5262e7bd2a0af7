// Embedding extraction, canonical keys, nearest-neighbour retrieval and ranking
pub const TARGET_VECTOR: &str = "vector_search";

/// Delimiter separating a source prefix from the article identity in storage keys.
pub const KEY_DELIMITER: char = '_';

pub mod canonical;
pub mod embedding;
pub mod ranking;
pub mod search;
pub mod types;

// Re-export main components
pub use canonical::*;
pub use embedding::*;
pub use ranking::*;
pub use search::*;
pub use types::*;
