//! Processor module for the dataset indexer.
//!
//! Transforms catalog records into search documents.

mod dataset_transformer;

pub use dataset_transformer::{DatasetTransformer, RecordTransformer, TransformError};
