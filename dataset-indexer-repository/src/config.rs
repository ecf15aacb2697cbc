//! Configuration types for the IndexStore.

/// Number of operations sent per bulk round trip.
pub const DEFAULT_BULK_CHUNK_SIZE: usize = 300;

/// Configuration for the IndexStore.
///
/// Controls how bulk writes are split into requests. Large chunks mean fewer
/// round trips but bigger request bodies and a larger blast radius when a
/// chunk is rejected.
#[derive(Debug, Clone)]
pub struct IndexStoreConfig {
    /// Maximum number of operations in a single bulk request.
    pub bulk_chunk_size: usize,
}

impl Default for IndexStoreConfig {
    fn default() -> Self {
        Self {
            bulk_chunk_size: DEFAULT_BULK_CHUNK_SIZE,
        }
    }
}

impl IndexStoreConfig {
    /// Create a config with a custom chunk size.
    ///
    /// A size of zero is treated as one.
    ///
    /// # Arguments
    ///
    /// * `bulk_chunk_size` - Maximum number of operations per bulk request
    pub fn with_bulk_chunk_size(bulk_chunk_size: usize) -> Self {
        Self {
            bulk_chunk_size: bulk_chunk_size.max(1),
        }
    }
}
