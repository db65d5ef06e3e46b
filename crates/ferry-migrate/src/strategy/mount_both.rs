//! Mount-both strategy
//!
//! Runs a single rsync Job that mounts the source and the destination claim
//! side by side. That needs both claims in one namespace on one cluster, and
//! a node both volumes can attach to at once:
//!
//! | Source            | Destination | Job runs on            |
//! |-------------------|-------------|------------------------|
//! | ROX or RWX        | RWX         | anywhere               |
//! | neither ROX/RWX   | any         | source's current node  |
//! | ROX or RWX        | not RWX     | dest's current node    |
//!
//! When source and destination sit on the same node no shared access mode is
//! needed at all.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::info;

use ferry_common::kube_utils::migration_labels;
use ferry_common::Error;

use super::Strategy;
use crate::config::JobConfig;
use crate::rsync::{build_rsync_command, DEST_MOUNT_PATH, SOURCE_MOUNT_PATH};
use crate::runner::{JobRunner, ResourceCleaner};
use crate::task::MigrationTask;

/// Strategy name
pub const MOUNT_BOTH_NAME: &str = "mount-both";
/// Strategy priority; preferred over strategies that copy across pods
pub const MOUNT_BOTH_PRIORITY: i32 = 1000;

/// Prefix of the Job name; the task ID is appended
pub const JOB_NAME_PREFIX: &str = "ferry-rsync-";
/// Pod volume for the source claim
pub const SOURCE_VOLUME_NAME: &str = "source-vol";
/// Pod volume for the destination claim
pub const DEST_VOLUME_NAME: &str = "dest-vol";
/// Name of the rsync container
pub const CONTAINER_NAME: &str = "app";

const RESTART_POLICY_NEVER: &str = "Never";

/// Copies between two claims from one pod that mounts both
pub struct MountBoth {
    runner: Arc<dyn JobRunner>,
    cleaner: Arc<dyn ResourceCleaner>,
    config: JobConfig,
}

impl MountBoth {
    /// Create the strategy with default Job settings
    pub fn new(runner: Arc<dyn JobRunner>, cleaner: Arc<dyn ResourceCleaner>) -> Self {
        Self::with_config(runner, cleaner, JobConfig::default())
    }

    /// Create the strategy with custom Job settings
    pub fn with_config(
        runner: Arc<dyn JobRunner>,
        cleaner: Arc<dyn ResourceCleaner>,
        config: JobConfig,
    ) -> Self {
        Self {
            runner,
            cleaner,
            config,
        }
    }
}

#[async_trait]
impl Strategy for MountBoth {
    fn name(&self) -> &'static str {
        MOUNT_BOTH_NAME
    }

    fn priority(&self) -> i32 {
        MOUNT_BOTH_PRIORITY
    }

    fn can_do(&self, task: &MigrationTask) -> bool {
        can_mount_both(task)
    }

    async fn run(&self, task: &MigrationTask) -> Result<(), Error> {
        if !self.can_do(task) {
            return Err(Error::not_applicable(MOUNT_BOTH_NAME, task.id()));
        }

        let node = determine_target_node(task);
        info!(
            task_id = %task.id(),
            strategy = MOUNT_BOTH_NAME,
            node = node.unwrap_or("<any>"),
            "Running migration job"
        );
        let job = build_rsync_job(task, node, &self.config);
        self.runner
            .create_and_wait(task.source().cluster(), job)
            .await
    }

    async fn cleanup(&self, task: &MigrationTask) -> Result<(), Error> {
        let source = task.source();
        self.cleaner
            .cleanup_for_id(source.cluster(), &source.claim().namespace, task.id())
            .await
    }
}

/// Whether one pod can mount both claims of `task`
pub fn can_mount_both(task: &MigrationTask) -> bool {
    let source = task.source();
    let dest = task.dest();

    if !source.cluster().same_cluster(dest.cluster()) {
        return false;
    }
    if source.claim().namespace != dest.claim().namespace {
        return false;
    }

    let same_node = source.mounted_node() == dest.mounted_node();
    same_node || source.supports_rox() || source.supports_rwx() || dest.supports_rwx()
}

/// Node the Job must be pinned to; `None` lets the scheduler choose.
///
/// Assumes [`can_mount_both`] already holds. The last branch returns the
/// destination's node even when the destination is unbound.
pub fn determine_target_node(task: &MigrationTask) -> Option<&str> {
    let source = task.source();
    let dest = task.dest();
    let source_shared = source.supports_rox() || source.supports_rwx();

    if source_shared && dest.supports_rwx() {
        return None;
    }
    if !source_shared {
        return source.mounted_node();
    }
    dest.mounted_node()
}

/// Job name for a task
pub fn rsync_job_name(task_id: &str) -> String {
    format!("{}{}", JOB_NAME_PREFIX, task_id)
}

fn claim_volume(volume_name: &str, claim_name: &str) -> Volume {
    Volume {
        name: volume_name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim_name.to_string(),
            read_only: None,
        }),
        ..Default::default()
    }
}

/// Build the rsync Job for `task`, pinned to `node` when given
pub fn build_rsync_job(task: &MigrationTask, node: Option<&str>, config: &JobConfig) -> Job {
    let id = task.id();
    let job_name = rsync_job_name(id);
    let namespace = task.dest().claim().namespace.clone();
    let labels = migration_labels(id);

    let command = build_rsync_command(task.options().delete_extraneous_files, None);
    info!(task_id = %id, rsync_command = ?command, "Built rsync command");

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(config.image.clone()),
        command: Some(command),
        volume_mounts: Some(vec![
            VolumeMount {
                name: SOURCE_VOLUME_NAME.to_string(),
                mount_path: SOURCE_MOUNT_PATH.to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: DEST_VOLUME_NAME.to_string(),
                mount_path: DEST_MOUNT_PATH.to_string(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(job_name),
            namespace: Some(namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(config.backoff_limit),
            ttl_seconds_after_finished: Some(config.ttl_seconds_after_finished),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    namespace: Some(namespace),
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(vec![
                        claim_volume(SOURCE_VOLUME_NAME, &task.source().claim().name),
                        claim_volume(DEST_VOLUME_NAME, &task.dest().claim().name),
                    ]),
                    node_name: node.map(str::to_string),
                    restart_policy: Some(RESTART_POLICY_NEVER.to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
