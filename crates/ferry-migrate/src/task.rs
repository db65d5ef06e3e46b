//! Migration task model
//!
//! A task pairs a source and a destination endpoint. Each endpoint knows the
//! claim it refers to, the cluster it lives on, the node its volume is
//! currently attached to, and which shared access modes the claim declares.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use kube::Client;
use rand::Rng;

use ferry_common::kube_utils;
use ferry_common::Result;

/// PVC access mode allowing read-only mounts from many nodes
pub const ACCESS_MODE_READ_ONLY_MANY: &str = "ReadOnlyMany";
/// PVC access mode allowing read-write mounts from many nodes
pub const ACCESS_MODE_READ_WRITE_MANY: &str = "ReadWriteMany";

const ID_LENGTH: usize = 5;
const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Handle to a cluster an endpoint lives on.
///
/// Equality is identity: clones of one handle are equal, while two handles
/// built separately are different clusters even if they share a kubeconfig.
#[derive(Clone)]
pub struct ClusterHandle {
    inner: Arc<ClusterInner>,
}

struct ClusterInner {
    name: String,
    client: Client,
}

impl ClusterHandle {
    /// Wrap an existing client
    pub fn new(name: impl Into<String>, client: Client) -> Self {
        Self {
            inner: Arc::new(ClusterInner {
                name: name.into(),
                client,
            }),
        }
    }

    /// Build a client from an optional kubeconfig path and wrap it
    pub async fn connect(name: impl Into<String>, kubeconfig: Option<&Path>) -> Result<Self> {
        let client = kube_utils::create_client(kubeconfig).await?;
        Ok(Self::new(name, client))
    }

    /// Display name (usually the kubeconfig context)
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Kubernetes client for this cluster
    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    /// True when both handles refer to the same cluster
    pub fn same_cluster(&self, other: &ClusterHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for ClusterHandle {
    fn eq(&self, other: &Self) -> bool {
        self.same_cluster(other)
    }
}

impl Eq for ClusterHandle {}

impl fmt::Debug for ClusterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterHandle")
            .field("name", &self.inner.name)
            .field("id", &Arc::as_ptr(&self.inner))
            .finish()
    }
}

/// Reference to a persistent volume claim
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimRef {
    /// Claim name
    pub name: String,
    /// Claim namespace
    pub namespace: String,
}

impl ClaimRef {
    /// Create a claim reference
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for ClaimRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One side of a migration
#[derive(Clone, Debug)]
pub struct Endpoint {
    cluster: ClusterHandle,
    claim: ClaimRef,
    mounted_node: Option<String>,
    supports_rox: bool,
    supports_rwx: bool,
}

impl Endpoint {
    /// Create an unmounted endpoint with no shared access modes
    pub fn new(cluster: ClusterHandle, claim: ClaimRef) -> Self {
        Self {
            cluster,
            claim,
            mounted_node: None,
            supports_rox: false,
            supports_rwx: false,
        }
    }

    /// Set the node the volume is currently attached to
    pub fn with_mounted_node(mut self, node: impl Into<String>) -> Self {
        let node = node.into();
        self.mounted_node = if node.is_empty() { None } else { Some(node) };
        self
    }

    /// Derive capability flags from the claim's declared access modes
    pub fn with_access_modes<S: AsRef<str>>(mut self, modes: &[S]) -> Self {
        self.supports_rox = modes
            .iter()
            .any(|m| m.as_ref() == ACCESS_MODE_READ_ONLY_MANY);
        self.supports_rwx = modes
            .iter()
            .any(|m| m.as_ref() == ACCESS_MODE_READ_WRITE_MANY);
        self
    }

    /// Cluster this endpoint lives on
    pub fn cluster(&self) -> &ClusterHandle {
        &self.cluster
    }

    /// Claim this endpoint refers to
    pub fn claim(&self) -> &ClaimRef {
        &self.claim
    }

    /// Node the volume is attached to, `None` if unbound
    pub fn mounted_node(&self) -> Option<&str> {
        self.mounted_node.as_deref()
    }

    /// Claim declares `ReadOnlyMany`
    pub fn supports_rox(&self) -> bool {
        self.supports_rox
    }

    /// Claim declares `ReadWriteMany`
    pub fn supports_rwx(&self) -> bool {
        self.supports_rwx
    }
}

/// User-facing migration switches
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Remove files at the destination that are absent at the source
    pub delete_extraneous_files: bool,
    /// Migrate even if the source claim is mounted by a running pod
    pub ignore_mounted: bool,
    /// Leave the migration's resources in place after the run
    pub no_cleanup: bool,
}

/// A single source-to-destination copy
#[derive(Clone, Debug)]
pub struct MigrationTask {
    id: String,
    source: Endpoint,
    dest: Endpoint,
    options: MigrationOptions,
}

impl MigrationTask {
    /// Create a task with a freshly generated ID
    pub fn new(source: Endpoint, dest: Endpoint, options: MigrationOptions) -> Self {
        Self::with_id(generate_id(), source, dest, options)
    }

    /// Create a task with a known ID, e.g. to clean up an earlier run
    pub fn with_id(
        id: impl Into<String>,
        source: Endpoint,
        dest: Endpoint,
        options: MigrationOptions,
    ) -> Self {
        Self {
            id: id.into(),
            source,
            dest,
            options,
        }
    }

    /// Unique task ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Source endpoint
    pub fn source(&self) -> &Endpoint {
        &self.source
    }

    /// Destination endpoint
    pub fn dest(&self) -> &Endpoint {
        &self.dest
    }

    /// Migration options
    pub fn options(&self) -> &MigrationOptions {
        &self.options
    }
}

/// Generate a short DNS-label-safe task ID
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LENGTH)
        .map(|_| ID_CHARSET[rng.gen_range(0..ID_CHARSET.len())] as char)
        .collect()
}
