//! PVC-to-PVC data migration
//!
//! Copies the contents of one persistent volume claim into another by
//! running an rsync Job on the cluster:
//! - [`task`] models the source and destination claims and their placement
//! - [`pvc`] discovers that placement from the live cluster
//! - [`strategy`] decides how a task can be executed; [`MountBoth`] mounts
//!   both claims into a single pod
//! - [`Migrator`] picks the best strategy, runs it and cleans up
//!
//! ```ignore
//! let cluster = ClusterHandle::connect("prod", None).await?;
//! let source = discover_endpoint(&cluster, "apps", "data-old").await?;
//! let dest = discover_endpoint(&cluster, "apps", "data-new").await?;
//! let task = MigrationTask::new(source, dest, MigrationOptions::default());
//!
//! let migrator = Migrator::with_defaults(
//!     Arc::new(KubeJobRunner::default()),
//!     Arc::new(KubeResourceCleaner),
//!     JobConfig::default(),
//! );
//! migrator.migrate(&task).await?;
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod migrator;
pub mod pvc;
pub mod rsync;
pub mod runner;
pub mod strategy;
pub mod task;

pub use config::JobConfig;
pub use migrator::Migrator;
pub use pvc::discover_endpoint;
pub use runner::{JobRunner, KubeJobRunner, KubeResourceCleaner, ResourceCleaner};
pub use strategy::{MountBoth, Strategy};
pub use task::{ClaimRef, ClusterHandle, Endpoint, MigrationOptions, MigrationTask};
