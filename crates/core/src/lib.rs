// Core types and functionality for the dagworker workflow engine

pub mod consumer;
pub mod error;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod registry;
pub mod storage;
pub mod types;
pub mod workflow;

pub use error::{DagError, DagResult};
pub use types::*;
