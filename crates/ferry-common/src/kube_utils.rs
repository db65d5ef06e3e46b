//! Shared Kubernetes utilities using kube-rs
//!
//! Client construction, migration labels, and the Job status helpers used to
//! wait for a migration Job to reach a terminal state.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use k8s_openapi::api::batch::v1::Job;
use kube::api::Api;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, ResourceExt};
use tracing::{debug, trace};

use crate::Error;

/// Label key recording which tool created a resource
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
/// Value of [`LABEL_MANAGED_BY`] for ferry resources
pub const LABEL_MANAGED_BY_FERRY: &str = "ferry";
/// Label key carrying the migration task ID
pub const LABEL_MIGRATION_ID: &str = "ferry.dev/migration-id";

// Kubernetes condition type constants
/// The "Complete" condition type for Jobs
pub const CONDITION_COMPLETE: &str = "Complete";
/// The "Failed" condition type for Jobs
pub const CONDITION_FAILED: &str = "Failed";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// Default polling interval for wait operations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Labels attached to every resource created for a migration task.
pub fn migration_labels(id: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        LABEL_MANAGED_BY.to_string(),
        LABEL_MANAGED_BY_FERRY.to_string(),
    );
    labels.insert(LABEL_MIGRATION_ID.to_string(), id.to_string());
    labels
}

/// Label selector matching every resource of a migration task
pub fn migration_selector(id: &str) -> String {
    format!("{}={}", LABEL_MIGRATION_ID, id)
}

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
///
/// Without a path the config is inferred (in-cluster, then `$KUBECONFIG`).
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

fn job_condition_true(job: &Job, condition_type: &str) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == condition_type && c.status == STATUS_TRUE)
        })
        .unwrap_or(false)
}

/// Check if a Job has completed successfully
pub fn is_job_complete(job: &Job) -> bool {
    job_condition_true(job, CONDITION_COMPLETE)
}

/// Check if a Job has failed
pub fn is_job_failed(job: &Job) -> bool {
    job_condition_true(job, CONDITION_FAILED)
}

/// Extract failure message from a failed Job
pub fn job_failure_message(job: &Job) -> Option<String> {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.type_ == CONDITION_FAILED && c.status == STATUS_TRUE)
                .and_then(|c| c.message.clone())
        })
}

/// Terminal state of a Job, if it has reached one
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// Still running (or not yet scheduled)
    Running,
    /// `Complete=True`
    Succeeded,
    /// `Failed=True`, with the condition message
    Failed(Option<String>),
}

impl JobOutcome {
    /// Classify a Job by its status conditions
    pub fn of(job: &Job) -> Self {
        if is_job_complete(job) {
            JobOutcome::Succeeded
        } else if is_job_failed(job) {
            JobOutcome::Failed(job_failure_message(job))
        } else {
            JobOutcome::Running
        }
    }
}

/// How to wait for a Job
#[derive(Clone, Debug)]
pub struct WaitConfig {
    /// Time between status reads
    pub poll_interval: Duration,
    /// Give up after this long; `None` waits until the caller drops the future
    pub timeout: Option<Duration>,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

/// True for API errors worth retrying: transport failures, request
/// timeouts, throttling and server-side errors.
///
/// Other client errors (403, 404, ...) and non-API errors are final.
pub fn is_transient(err: &Error) -> bool {
    match err {
        Error::Kube {
            source: kube::Error::Api(response),
        } => response.code == 408 || response.code == 429 || response.code >= 500,
        Error::Kube {
            source: kube::Error::HyperError(_) | kube::Error::Service(_),
        } => true,
        _ => false,
    }
}

/// Poll `check_fn` until it yields a value.
///
/// `Ok(None)` means not yet. Transient errors are logged and retried, any
/// other error ends the poll. Without a `timeout` this polls until the
/// caller drops the future.
pub async fn poll_until<T, F, Fut>(
    operation: &str,
    poll_interval: Duration,
    timeout: Option<Duration>,
    mut check_fn: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, Error>>,
{
    let start = Instant::now();

    loop {
        match check_fn().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                trace!(operation = %operation, "Polling condition not yet met, retrying...");
            }
            Err(e) if is_transient(&e) => {
                debug!(operation = %operation, error = %e, "Transient error while polling, retrying");
            }
            Err(e) => return Err(e),
        }

        if let Some(timeout) = timeout {
            if start.elapsed() >= timeout {
                return Err(Error::Timeout {
                    operation: operation.to_string(),
                    seconds: timeout.as_secs(),
                });
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Wait for a Job to reach a terminal condition.
///
/// Returns `Ok(())` on `Complete`, [`Error::JobFailed`] on `Failed`, and
/// [`Error::Timeout`] if `config.timeout` elapses first. Transient API
/// errors are retried; a deleted Job (404) ends the wait.
pub async fn wait_for_job(
    client: &Client,
    name: &str,
    namespace: &str,
    config: &WaitConfig,
) -> Result<(), Error> {
    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    let jobs = &jobs;
    let operation = format!("job {}/{}", namespace, name);

    poll_until(
        &operation,
        config.poll_interval,
        config.timeout,
        move || async move {
            let job = jobs.get(name).await?;
            match JobOutcome::of(&job) {
                JobOutcome::Succeeded => {
                    debug!(job = %name, namespace = %namespace, "Job completed");
                    Ok(Some(()))
                }
                JobOutcome::Failed(message) => Err(match job.labels().get(LABEL_MIGRATION_ID) {
                    Some(task_id) => Error::job_failed_for_task(task_id, name, namespace, message),
                    None => Error::job_failed(name, namespace, message),
                }),
                JobOutcome::Running => Ok(None),
            }
        },
    )
    .await
}
