/// Configuration: clusters, global defaults and per-instance overrides

pub mod cluster;
pub mod settings;

pub use cluster::Cluster;
pub use settings::{defaults, init_defaults, reset_defaults, ClientConfig, Defaults, Settings};
