// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod backoff;
pub mod classifier;
pub mod controller;
pub mod error;
pub mod finalizer;
pub mod store;
pub mod watcher;

// Re-export primary types
pub use backoff::RequeueBackoff;
pub use classifier::{is_destroy_event, is_init_status, is_only_status_change, EventClassifier};
pub use controller::{Outcome, PoolController, PoolControllerConfig};
pub use error::{ControllerError, Result};
pub use finalizer::remove_finalizer;
pub use store::{update_with_retry, ApiPoolStore, MemoryPoolStore, PoolStore};
pub use watcher::PoolWatcher;
