//! Bounded-concurrency enumeration engine
//!
//! # Architecture
//!
//! - [`orchestrator`] - fans workers out per region and shuts everything down in order
//! - [`aggregator`] - single consumer collecting records into the inventory
//! - [`progress`] - periodic status line driven by the [`counter`]
//! - [`availability`] - gates regions where the service is not deployed
//! - [`cache`] - single-flight memoization of expensive remote calls
//! - [`context`] - run-scoped state shared by every component
//! - [`module`] - the contract each resource module implements

pub mod aggregator;
pub mod availability;
pub mod cache;
pub mod context;
pub mod counter;
pub mod module;
pub mod orchestrator;
pub mod progress;

pub use availability::{RemoteServiceMap, ServiceAvailability, StaticServiceMap};
pub use context::{EngineSettings, RunContext};
pub use counter::{CommandCounter, CommandCounts};
pub use module::{RegionOutput, RegionTask, ScanModule};
pub use orchestrator::{run_module, run_module_with_sink, RunReport};
