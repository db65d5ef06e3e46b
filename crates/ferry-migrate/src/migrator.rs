//! Strategy selection and migration lifecycle
//!
//! The migrator owns an explicit, priority-ordered list of strategies. For
//! each task it refuses mounted sources unless told otherwise, picks the
//! first strategy that accepts the task, runs it and cleans up afterwards.

use std::sync::Arc;

use tracing::{info, warn};

use ferry_common::{Error, Result};

use crate::config::JobConfig;
use crate::runner::{JobRunner, ResourceCleaner};
use crate::strategy::{MountBoth, Strategy};
use crate::task::MigrationTask;

/// Runs migration tasks with the best applicable strategy
pub struct Migrator {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl Migrator {
    /// Create a migrator; strategies are ordered by descending priority,
    /// keeping the given order among equal priorities
    pub fn new(mut strategies: Vec<Arc<dyn Strategy>>) -> Self {
        strategies.sort_by_key(|s| std::cmp::Reverse(s.priority()));
        Self { strategies }
    }

    /// Migrator with every built-in strategy
    pub fn with_defaults(
        runner: Arc<dyn JobRunner>,
        cleaner: Arc<dyn ResourceCleaner>,
        config: JobConfig,
    ) -> Self {
        Self::new(vec![Arc::new(MountBoth::with_config(runner, cleaner, config))])
    }

    /// Strategy names in the order they are tried
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// First strategy that can perform `task`
    pub fn select(&self, task: &MigrationTask) -> Option<&Arc<dyn Strategy>> {
        self.strategies.iter().find(|s| s.can_do(task))
    }

    /// Perform `task`.
    ///
    /// A run error takes precedence over a cleanup error.
    pub async fn migrate(&self, task: &MigrationTask) -> Result<()> {
        let source = task.source();
        if let Some(node) = source.mounted_node() {
            if !task.options().ignore_mounted {
                return Err(Error::validation_for(
                    source.claim().to_string(),
                    format!(
                        "claim is mounted on node {} and ignore_mounted is not set",
                        node
                    ),
                ));
            }
        }

        let strategy = self.select(task).ok_or_else(|| Error::NoApplicableStrategy {
            task_id: task.id().to_string(),
        })?;

        info!(
            task_id = %task.id(),
            strategy = strategy.name(),
            source = %source.claim(),
            dest = %task.dest().claim(),
            "Starting migration"
        );
        let run_result = strategy.run(task).await;

        if task.options().no_cleanup {
            info!(task_id = %task.id(), "Skipping cleanup");
            return run_result;
        }

        let cleanup_result = strategy.cleanup(task).await;
        match (run_result, cleanup_result) {
            (Err(run_err), Err(cleanup_err)) => {
                warn!(
                    task_id = %task.id(),
                    error = %cleanup_err,
                    "Cleanup failed after failed migration"
                );
                Err(run_err)
            }
            (Err(run_err), Ok(())) => Err(run_err),
            (Ok(()), cleanup_result) => {
                if cleanup_result.is_ok() {
                    info!(task_id = %task.id(), strategy = strategy.name(), "Migration finished");
                }
                cleanup_result
            }
        }
    }
}
