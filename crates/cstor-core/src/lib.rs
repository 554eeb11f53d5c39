//! cStor Core - Resource model shared by the pool management agent
//!
//! This crate provides:
//! - The `CStorPool` resource (spec, status, phase, pool layout)
//! - Finalizer and pool-name constants
//! - Change notifications delivered to the controller
//! - Error types with miette diagnostics and serialization helpers

pub mod error;
pub mod events;
pub mod pool;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use events::PoolEvent;
pub use pool::{
    CStorPool, CStorPoolAttr, CStorPoolSpec, CStorPoolStatus, DiskAttr, PoolPhase, PoolType,
    API_GROUP, API_VERSION, KIND, PLURAL, POOL_FINALIZER, POOL_PREFIX,
};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

/// Serialize a resource to JSON
pub fn to_json<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_json::to_string(resource).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a resource from JSON
pub fn from_json<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}
