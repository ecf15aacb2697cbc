//! OpenSearch index configuration and mappings.
//!
//! This module defines the index settings and mappings for the dataset search index.

use serde_json::{json, Value};

/// Default name of the dataset search index.
pub const INDEX_NAME: &str = "metax";

/// Configuration for the search index.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// The index name (used for all operations).
    pub name: String,
    /// Number of primary shards to create the index with.
    pub shards: u32,
    /// Number of replicas to create the index with.
    pub replicas: u32,
}

impl IndexConfig {
    /// Create a new index configuration with one shard and one replica.
    ///
    /// # Arguments
    ///
    /// * `name` - The index name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shards: 1,
            replicas: 1,
        }
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self::new(INDEX_NAME)
    }
}

/// Get the index settings and mappings for the dataset search index.
///
/// The configuration includes:
/// - **Keyword fields**: identifiers and catalog ids, for filtering and exact lookups
/// - **Language objects**: `title` and `description` are `{lang: text}` objects;
///   their text is analysed dynamically, with a `raw` keyword sub-field on titles for sorting
/// - **Dates**: modification date for "most recent" ordering
pub fn get_index_settings(config: &IndexConfig) -> Value {
    json!({
        "settings": {
            "number_of_shards": config.shards,
            "number_of_replicas": config.replicas
        },
        "mappings": {
            "dynamic_templates": [
                {
                    "title_languages": {
                        "path_match": "title.*",
                        "mapping": {
                            "type": "text",
                            "fields": {
                                "raw": { "type": "keyword", "ignore_above": 256 }
                            }
                        }
                    }
                },
                {
                    "catalog_title_languages": {
                        "path_match": "data_catalog.*",
                        "mapping": {
                            "type": "text",
                            "fields": {
                                "raw": { "type": "keyword", "ignore_above": 256 }
                            }
                        }
                    }
                }
            ],
            "properties": {
                "identifier": {
                    "type": "keyword"
                },
                "preferred_identifier": {
                    "type": "keyword"
                },
                "dataset_version_set": {
                    "type": "keyword"
                },
                "data_catalog_identifier": {
                    "type": "keyword"
                },
                "date_modified": {
                    "type": "date"
                },
                "keyword": {
                    "type": "text",
                    "fields": {
                        "raw": { "type": "keyword", "ignore_above": 256 }
                    }
                },
                "preservation_state": {
                    "type": "integer"
                },
                "preservation_identifier": {
                    "type": "keyword"
                },
                "preservation_dataset_version": {
                    "type": "object",
                    "enabled": false
                },
                "preservation_dataset_origin_version": {
                    "type": "object",
                    "enabled": false
                }
            }
        }
    })
}
