//! Chunked disk cache backing the VFS read path

pub mod chunk;

pub use chunk::{CacheConfig, CacheStats, ChunkCache, EvictionPolicy};
