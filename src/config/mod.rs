pub mod settings;

pub use settings::{ServerConfig, Settings, StorageBackend, StorageConfig, UpstreamConfig};
