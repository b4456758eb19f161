//! regionsweep
//!
//! Concurrent multi-region inventory of cloud resources: one bounded worker
//! pool per module, single-flight caching of remote list calls, and table,
//! JSON, YAML and loot output.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod loot;
pub mod modules;
pub mod output;

/// Version injected at compile time via REGIONSWEEP_VERSION, or the crate version.
pub const VERSION: &str = match option_env!("REGIONSWEEP_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};
