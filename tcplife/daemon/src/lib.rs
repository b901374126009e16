//! tcplife Userspace Library
//!
//! Provides reusable components for loading the eBPF tcplife probe and
//! consuming the connection records it emits.

pub mod collector;
pub mod events;
pub mod exporter;
pub mod loader;
pub mod types;

pub use collector::LifeCollector;
pub use events::EventProcessor;
pub use exporter::{JsonExporter, ReportExporter};
pub use loader::ProbeLoader;
pub use types::*;
