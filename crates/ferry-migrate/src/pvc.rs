//! Endpoint discovery from live PVCs
//!
//! Reads a claim's access modes and finds the node it is attached to by
//! looking for a running pod that mounts it.

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::{Api, ListParams};
use tracing::debug;

use ferry_common::{Error, Result};

use crate::task::{ClaimRef, ClusterHandle, Endpoint};

const POD_PHASE_SUCCEEDED: &str = "Succeeded";
const POD_PHASE_FAILED: &str = "Failed";

/// Build an endpoint for `namespace/name` by querying the cluster
pub async fn discover_endpoint(
    cluster: &ClusterHandle,
    namespace: &str,
    name: &str,
) -> Result<Endpoint> {
    let claims: Api<PersistentVolumeClaim> = Api::namespaced(cluster.client().clone(), namespace);
    let pvc = claims.get_opt(name).await?.ok_or_else(|| {
        Error::validation_for(
            ClaimRef::new(namespace, name).to_string(),
            "persistent volume claim not found",
        )
    })?;

    let pods: Api<Pod> = Api::namespaced(cluster.client().clone(), namespace);
    let pod_list = pods.list(&ListParams::default()).await?;

    let endpoint = endpoint_from_parts(cluster.clone(), &pvc, &pod_list.items)?;
    debug!(
        cluster = %cluster.name(),
        claim = %endpoint.claim(),
        node = ?endpoint.mounted_node(),
        rox = endpoint.supports_rox(),
        rwx = endpoint.supports_rwx(),
        "Discovered endpoint"
    );
    Ok(endpoint)
}

/// Build an endpoint from an already fetched claim and the pods next to it
pub fn endpoint_from_parts(
    cluster: ClusterHandle,
    pvc: &PersistentVolumeClaim,
    pods: &[Pod],
) -> Result<Endpoint> {
    let name = pvc
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::validation("persistent volume claim has no name"))?;
    let namespace = pvc
        .metadata
        .namespace
        .clone()
        .ok_or_else(|| Error::validation_for(&name, "persistent volume claim has no namespace"))?;

    let access_modes = pvc
        .spec
        .as_ref()
        .and_then(|s| s.access_modes.clone())
        .unwrap_or_default();

    let mut endpoint =
        Endpoint::new(cluster, ClaimRef::new(namespace, &name)).with_access_modes(&access_modes);
    if let Some(node) = mounted_node(&name, pods) {
        endpoint = endpoint.with_mounted_node(node);
    }
    Ok(endpoint)
}

/// Node of the first live pod mounting `claim_name`
fn mounted_node<'a>(claim_name: &str, pods: &'a [Pod]) -> Option<&'a str> {
    pods.iter()
        .filter(|pod| is_live(pod))
        .filter(|pod| mounts_claim(pod, claim_name))
        .find_map(|pod| pod.spec.as_ref().and_then(|s| s.node_name.as_deref()))
}

fn is_live(pod: &Pod) -> bool {
    !matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some(POD_PHASE_SUCCEEDED) | Some(POD_PHASE_FAILED)
    )
}

fn mounts_claim(pod: &Pod, claim_name: &str) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .map(|volumes| {
            volumes.iter().any(|v| {
                v.persistent_volume_claim
                    .as_ref()
                    .is_some_and(|pvc| pvc.claim_name == claim_name)
            })
        })
        .unwrap_or(false)
}
