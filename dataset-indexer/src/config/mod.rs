//! Configuration and dependency initialization.

mod dependencies;
pub mod settings;

pub use dependencies::Dependencies;
pub use settings::{BrokerSettings, CatalogSettings, ConnectionMode, Settings};
