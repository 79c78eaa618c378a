//! Chunk Worker and Merge Worker lifecycles (spec.md §4.3–§4.5).
pub mod chunk_worker;
pub mod merge_worker;
