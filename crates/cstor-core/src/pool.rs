use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::fmt;

/// API group of the CStorPool resource
pub const API_GROUP: &str = "openebs.io";
/// API version of the CStorPool resource
pub const API_VERSION: &str = "v1alpha1";
/// Kind of the CStorPool resource
pub const KIND: &str = "CStorPool";
/// Plural resource name used in REST paths
pub const PLURAL: &str = "cstorpools";

/// Finalizer token protecting a pool resource until its pool is destroyed
pub const POOL_FINALIZER: &str = "openebs";

/// Prefix of every pool name; the rest is the resource UID
pub const POOL_PREFIX: &str = "cstor-";

/// A ZFS-backed storage pool owned by exactly one node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CStorPool {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: CStorPoolSpec,
    #[serde(default)]
    pub status: CStorPoolStatus,
}

/// Desired pool configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CStorPoolSpec {
    #[serde(default)]
    pub disks: DiskAttr,
    #[serde(default)]
    pub pool_spec: CStorPoolAttr,
}

/// Block devices backing the pool, in vdev order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskAttr {
    #[serde(default)]
    pub disk_list: Vec<String>,
}

/// Pool layout and toolchain options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CStorPoolAttr {
    /// Where the pool toolchain persists pool metadata across restarts
    #[serde(default)]
    pub cache_file: String,
    #[serde(default)]
    pub pool_type: PoolType,
    /// Consumed by capacity accounting elsewhere, never acted on here
    #[serde(default)]
    pub over_provisioning: bool,
}

/// Observed pool state, written only by the owning node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CStorPoolStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<PoolPhase>,
}

/// Vdev layout of a pool; immutable once the pool exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolType {
    #[default]
    Striped,
    Mirror,
    Raidz,
    Raidz2,
    Raidz3,
}

impl PoolType {
    /// The vdev keyword placed before the disk list, if the layout needs one
    pub fn vdev_keyword(&self) -> Option<&'static str> {
        match self {
            PoolType::Striped => None,
            PoolType::Mirror => Some("mirror"),
            PoolType::Raidz => Some("raidz"),
            PoolType::Raidz2 => Some("raidz2"),
            PoolType::Raidz3 => Some("raidz3"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolType::Striped => "striped",
            PoolType::Mirror => "mirror",
            PoolType::Raidz => "raidz",
            PoolType::Raidz2 => "raidz2",
            PoolType::Raidz3 => "raidz3",
        }
    }
}

impl fmt::Display for PoolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase reported in the resource status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolPhase {
    Init,
    Online,
    Offline,
    Deleting,
    Error,
}

impl PoolPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolPhase::Init => "init",
            PoolPhase::Online => "online",
            PoolPhase::Offline => "offline",
            PoolPhase::Deleting => "deleting",
            PoolPhase::Error => "error",
        }
    }
}

impl fmt::Display for PoolPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CStorPool {
    /// Create a pool resource with the given name and UID and an empty spec
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            api_version: Some(format!("{}/{}", API_GROUP, API_VERSION)),
            kind: Some(KIND.to_string()),
            metadata: ObjectMeta {
                name: Some(name.into()),
                uid: Some(uid.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Resource name, or an empty string when unset
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Identity token, or an empty string when unset
    pub fn uid(&self) -> &str {
        self.metadata.uid.as_deref().unwrap_or_default()
    }

    /// Name of the on-disk pool backing this resource
    pub fn pool_name(&self) -> String {
        format!("{}{}", POOL_PREFIX, self.uid())
    }

    pub fn disks(&self) -> &[String] {
        &self.spec.disks.disk_list
    }

    pub fn cache_file(&self) -> &str {
        &self.spec.pool_spec.cache_file
    }

    pub fn pool_type(&self) -> PoolType {
        self.spec.pool_spec.pool_type
    }

    /// Current phase; an unset phase means not yet provisioned
    pub fn phase(&self) -> PoolPhase {
        self.status.phase.unwrap_or(PoolPhase::Init)
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn finalizers(&self) -> &[String] {
        self.metadata.finalizers.as_deref().unwrap_or_default()
    }

    pub fn has_finalizer(&self, token: &str) -> bool {
        self.finalizers().iter().any(|f| f == token)
    }

    /// Drop `token` from the finalizer list, leaving other finalizers alone.
    /// Returns whether anything was removed.
    pub fn remove_finalizer(&mut self, token: &str) -> bool {
        let Some(finalizers) = self.metadata.finalizers.as_mut() else {
            return false;
        };
        let before = finalizers.len();
        finalizers.retain(|f| f != token);
        before != finalizers.len()
    }

    // Builder helpers, mostly for fixtures

    pub fn with_disks<I, S>(mut self, disks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.disks.disk_list = disks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pool_type(mut self, pool_type: PoolType) -> Self {
        self.spec.pool_spec.pool_type = pool_type;
        self
    }

    pub fn with_cache_file(mut self, cache_file: impl Into<String>) -> Self {
        self.spec.pool_spec.cache_file = cache_file.into();
        self
    }

    pub fn with_finalizer(mut self, token: impl Into<String>) -> Self {
        self.metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(token.into());
        self
    }

    pub fn with_phase(mut self, phase: PoolPhase) -> Self {
        self.status.phase = Some(phase);
        self
    }
}
