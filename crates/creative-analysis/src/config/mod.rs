pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, load_from_env, load_from_vars};
pub use schema::{LogFormat, MetadataBackend, Secrets, SegmenterBackend, WorkerConfig};
