//! Job execution and resource cleanup
//!
//! Strategies hand a finished Job definition to a [`JobRunner`] and remove
//! what they created through a [`ResourceCleaner`]. Both are traits so tests
//! can mock the cluster while production code talks to the API server.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Pod, Secret, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use ferry_common::kube_utils::{self, migration_selector, WaitConfig};
use ferry_common::Error;

use crate::task::ClusterHandle;

/// Submits a Job and waits for it to finish
#[cfg_attr(test, automock)]
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Create `job` on `cluster` and block until it succeeds or fails
    async fn create_and_wait(&self, cluster: &ClusterHandle, job: Job) -> Result<(), Error>;
}

/// Removes everything created for a migration task
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceCleaner: Send + Sync {
    /// Delete resources labelled with `id` in `namespace`; a no-op if none exist
    async fn cleanup_for_id(
        &self,
        cluster: &ClusterHandle,
        namespace: &str,
        id: &str,
    ) -> Result<(), Error>;
}

/// [`JobRunner`] that creates the Job through the API server and polls it
#[derive(Clone, Debug, Default)]
pub struct KubeJobRunner {
    wait: WaitConfig,
}

impl KubeJobRunner {
    /// Create a runner with the given wait settings
    pub fn new(wait: WaitConfig) -> Self {
        Self { wait }
    }
}

#[async_trait]
impl JobRunner for KubeJobRunner {
    async fn create_and_wait(&self, cluster: &ClusterHandle, job: Job) -> Result<(), Error> {
        let name = job
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::validation("job has no name"))?;
        let namespace = job
            .metadata
            .namespace
            .clone()
            .ok_or_else(|| Error::validation_for(&name, "job has no namespace"))?;

        let jobs: Api<Job> = Api::namespaced(cluster.client().clone(), &namespace);
        jobs.create(&PostParams::default(), &job).await?;
        info!(
            cluster = %cluster.name(),
            job = %name,
            namespace = %namespace,
            "Created migration job, waiting for completion"
        );

        kube_utils::wait_for_job(cluster.client(), &name, &namespace, &self.wait).await
    }
}

/// [`ResourceCleaner`] deleting labelled Jobs, Pods, Services and Secrets.
///
/// Every kind is attempted even if an earlier one fails; failures come back
/// as one [`Error::CleanupFailed`].
#[derive(Clone, Debug, Default)]
pub struct KubeResourceCleaner;

#[async_trait]
impl ResourceCleaner for KubeResourceCleaner {
    async fn cleanup_for_id(
        &self,
        cluster: &ClusterHandle,
        namespace: &str,
        id: &str,
    ) -> Result<(), Error> {
        let selector = migration_selector(id);
        info!(
            cluster = %cluster.name(),
            namespace = %namespace,
            task_id = %id,
            "Cleaning up migration resources"
        );

        let client = cluster.client();
        let results = [
            (
                "jobs",
                delete_labelled::<Job>(client, namespace, &selector).await,
            ),
            (
                "pods",
                delete_labelled::<Pod>(client, namespace, &selector).await,
            ),
            // Not every API server supports deletecollection on Services
            (
                "services",
                delete_each_labelled::<Service>(client, namespace, &selector).await,
            ),
            (
                "secrets",
                delete_labelled::<Secret>(client, namespace, &selector).await,
            ),
        ];

        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|(kind, result)| result.err().map(|e| format!("{}: {}", kind, e)))
            .collect();
        if failures.is_empty() {
            return Ok(());
        }

        warn!(
            cluster = %cluster.name(),
            namespace = %namespace,
            task_id = %id,
            failed = failures.len(),
            "Some migration resources could not be deleted"
        );
        Err(Error::cleanup_failed(id, namespace, &failures))
    }
}

/// Delete every `K` in `namespace` matching `selector`.
///
/// Background propagation lets a deleted Job take its pods with it.
async fn delete_labelled<K>(client: &Client, namespace: &str, selector: &str) -> Result<(), Error>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    <K as Resource>::DynamicType: Default,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    api.delete_collection(
        &DeleteParams::background(),
        &ListParams::default().labels(selector),
    )
    .await?;
    debug!(
        kind = %K::kind(&Default::default()),
        namespace = %namespace,
        selector = %selector,
        "Deleted labelled resources"
    );
    Ok(())
}

/// Delete every `K` in `namespace` matching `selector`, one at a time
async fn delete_each_labelled<K>(
    client: &Client,
    namespace: &str,
    selector: &str,
) -> Result<(), Error>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    <K as Resource>::DynamicType: Default,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    let list = api.list(&ListParams::default().labels(selector)).await?;
    for item in &list.items {
        let name = item.name_any();
        api.delete(&name, &DeleteParams::background()).await?;
        debug!(
            kind = %K::kind(&Default::default()),
            name = %name,
            namespace = %namespace,
            "Deleted labelled resource"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::test_support::*;
    use ferry_common::kube_utils::migration_labels;
    use http::Method;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::time::Duration;

    const JOBS_PATH: &str = "/apis/batch/v1/namespaces/apps/jobs";
    const JOB_PATH: &str = "/apis/batch/v1/namespaces/apps/jobs/ferry-rsync-abc12";
    const PODS_PATH: &str = "/api/v1/namespaces/apps/pods";
    const SERVICES_PATH: &str = "/api/v1/namespaces/apps/services";
    const SECRETS_PATH: &str = "/api/v1/namespaces/apps/secrets";
    const SELECTOR_QUERY: &str = "labelSelector=ferry.dev%2Fmigration-id%3Dabc12";

    fn migration_job() -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some("ferry-rsync-abc12".to_string()),
                namespace: Some("apps".to_string()),
                labels: Some(migration_labels("abc12")),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn with_condition(mut job: Job, type_: &str, message: Option<&str>) -> Job {
        job.status = Some(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: type_.to_string(),
                status: "True".to_string(),
                message: message.map(str::to_string),
                ..Default::default()
            }]),
            ..Default::default()
        });
        job
    }

    fn fast_runner() -> KubeJobRunner {
        KubeJobRunner::new(WaitConfig {
            poll_interval: Duration::from_millis(1),
            timeout: None,
        })
    }

    fn service(name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("apps".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn assert_selects_migration(request: &http::Request<kube::client::Body>) {
        let query = request.uri().query().unwrap_or_default();
        assert!(
            query.contains(SELECTOR_QUERY),
            "query {query:?} lacks migration selector"
        );
    }

    #[tokio::test]
    async fn runner_creates_job_then_waits_for_completion() {
        let (cluster, mut server) = scripted_cluster("kind");
        let api_server = tokio::spawn(async move {
            expect_request(
                &mut server,
                Method::POST,
                JOBS_PATH,
                json_response(201, &migration_job()),
            )
            .await;
            expect_request(
                &mut server,
                Method::GET,
                JOB_PATH,
                json_response(200, &migration_job()),
            )
            .await;
            expect_request(
                &mut server,
                Method::GET,
                JOB_PATH,
                json_response(200, &with_condition(migration_job(), "Complete", None)),
            )
            .await;
        });

        fast_runner()
            .create_and_wait(&cluster, migration_job())
            .await
            .unwrap();
        api_server.await.unwrap();
    }

    #[tokio::test]
    async fn runner_keeps_waiting_through_api_outage() {
        let (cluster, mut server) = scripted_cluster("kind");
        let api_server = tokio::spawn(async move {
            expect_request(
                &mut server,
                Method::POST,
                JOBS_PATH,
                json_response(201, &migration_job()),
            )
            .await;
            expect_request(
                &mut server,
                Method::GET,
                JOB_PATH,
                status_response(503, "ServiceUnavailable", "etcdserver: leader changed"),
            )
            .await;
            expect_request(
                &mut server,
                Method::GET,
                JOB_PATH,
                json_response(200, &with_condition(migration_job(), "Complete", None)),
            )
            .await;
        });

        fast_runner()
            .create_and_wait(&cluster, migration_job())
            .await
            .unwrap();
        api_server.await.unwrap();
    }

    #[tokio::test]
    async fn runner_reports_failed_job_with_task_id() {
        let (cluster, mut server) = scripted_cluster("kind");
        let api_server = tokio::spawn(async move {
            expect_request(
                &mut server,
                Method::POST,
                JOBS_PATH,
                json_response(201, &migration_job()),
            )
            .await;
            expect_request(
                &mut server,
                Method::GET,
                JOB_PATH,
                json_response(
                    200,
                    &with_condition(migration_job(), "Failed", Some("BackoffLimitExceeded")),
                ),
            )
            .await;
        });

        let err = fast_runner()
            .create_and_wait(&cluster, migration_job())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::JobFailed { .. }));
        assert_eq!(err.task_id(), Some("abc12"));
        assert!(err.to_string().contains("BackoffLimitExceeded"));
        api_server.await.unwrap();
    }

    #[tokio::test]
    async fn runner_rejects_job_without_namespace() {
        let cluster = test_cluster("kind");
        let mut job = migration_job();
        job.metadata.namespace = None;

        let err = fast_runner().create_and_wait(&cluster, job).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn cleaner_deletes_every_kind_by_migration_label() {
        let (cluster, mut server) = scripted_cluster("kind");
        let api_server = tokio::spawn(async move {
            let request = expect_request(
                &mut server,
                Method::DELETE,
                JOBS_PATH,
                empty_list("batch/v1", "Job"),
            )
            .await;
            assert_selects_migration(&request);

            let request =
                expect_request(&mut server, Method::DELETE, PODS_PATH, empty_list("v1", "Pod"))
                    .await;
            assert_selects_migration(&request);

            let services = serde_json::json!({
                "apiVersion": "v1",
                "kind": "ServiceList",
                "metadata": {},
                "items": [service("ferry-ssh-abc12")],
            });
            let request = expect_request(
                &mut server,
                Method::GET,
                SERVICES_PATH,
                json_response(200, &services),
            )
            .await;
            assert_selects_migration(&request);
            expect_request(
                &mut server,
                Method::DELETE,
                "/api/v1/namespaces/apps/services/ferry-ssh-abc12",
                json_response(200, &service("ferry-ssh-abc12")),
            )
            .await;

            let request = expect_request(
                &mut server,
                Method::DELETE,
                SECRETS_PATH,
                empty_list("v1", "Secret"),
            )
            .await;
            assert_selects_migration(&request);
        });

        KubeResourceCleaner
            .cleanup_for_id(&cluster, "apps", "abc12")
            .await
            .unwrap();
        api_server.await.unwrap();
    }

    #[tokio::test]
    async fn cleaner_attempts_remaining_kinds_after_a_failure() {
        let (cluster, mut server) = scripted_cluster("kind");
        let api_server = tokio::spawn(async move {
            expect_request(
                &mut server,
                Method::DELETE,
                JOBS_PATH,
                status_response(403, "Forbidden", "jobs.batch is forbidden"),
            )
            .await;
            expect_request(&mut server, Method::DELETE, PODS_PATH, empty_list("v1", "Pod")).await;
            expect_request(
                &mut server,
                Method::GET,
                SERVICES_PATH,
                empty_list("v1", "Service"),
            )
            .await;
            expect_request(
                &mut server,
                Method::DELETE,
                SECRETS_PATH,
                empty_list("v1", "Secret"),
            )
            .await;
        });

        let err = KubeResourceCleaner
            .cleanup_for_id(&cluster, "apps", "abc12")
            .await
            .unwrap_err();
        api_server.await.unwrap();

        match err {
            Error::CleanupFailed {
                task_id,
                namespace,
                message,
            } => {
                assert_eq!(task_id, "abc12");
                assert_eq!(namespace, "apps");
                assert!(message.starts_with("jobs: "), "message: {message}");
                assert!(!message.contains("pods"));
            }
            other => panic!("Expected CleanupFailed, got {other:?}"),
        }
    }
}
