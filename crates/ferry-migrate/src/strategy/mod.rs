//! Migration strategies
//!
//! A strategy decides whether it can perform a [`MigrationTask`] and, if so,
//! runs it. The [`Migrator`](crate::Migrator) tries strategies from the
//! highest priority down and uses the first one that accepts the task.

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use ferry_common::Error;

use crate::task::MigrationTask;

mod mount_both;

pub use mount_both::{
    build_rsync_job, can_mount_both, determine_target_node, rsync_job_name, MountBoth,
    CONTAINER_NAME, DEST_VOLUME_NAME, JOB_NAME_PREFIX, MOUNT_BOTH_NAME, MOUNT_BOTH_PRIORITY,
    SOURCE_VOLUME_NAME,
};

/// A way of copying one claim into another
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Stable name used in logs
    fn name(&self) -> &'static str;

    /// Higher values are tried first
    fn priority(&self) -> i32;

    /// Whether this strategy can perform `task`; no side effects
    fn can_do(&self, task: &MigrationTask) -> bool;

    /// Perform the migration, returning once the copy has finished
    async fn run(&self, task: &MigrationTask) -> Result<(), Error>;

    /// Remove anything `run` created for `task`
    async fn cleanup(&self, task: &MigrationTask) -> Result<(), Error>;
}
