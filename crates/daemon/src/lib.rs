//! Snapdiff Daemon
//!
//! Diff worker lifecycle, the compute step and reference chain maintenance
//! on top of the snapshot store.

pub mod chain;
pub mod computer;
pub mod config;
pub mod engine;
pub mod worker;

pub use chain::ReferenceChain;
pub use computer::{DiffComputer, DiffJob};
pub use config::DaemonConfig;
pub use engine::Engine;
pub use worker::{DiffService, DiffWorker};
