//! Cordons a node and evicts its evictable workloads before it reboots.

use std::collections::HashSet;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::{
    Api, Client,
    api::{EvictParams, ListParams, Patch, PatchParams},
};
use tokio::time::Instant;

use crate::error::Error;

/// Mirror pods are managed directly by the kubelet, not by the scheduler; they are never
/// evicted. See `v1.MirrorPodAnnotationKey` in client-go.
const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// Upper bound on how long `drain` waits for evictions to take effect. Exceeding this is
/// not a failure — draining is best-effort and must not block reboot coordination.
const DRAIN_MAX_WAIT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[async_trait::async_trait]
pub trait Drainer: Send + Sync {
    async fn cordon(&self, node: &str) -> Result<(), Error>;
    async fn uncordon(&self, node: &str) -> Result<(), Error>;
    async fn drain(&self, node: &str) -> Result<(), Error>;
}

pub struct KubeDrainer {
    nodes: Api<Node>,
    pods: Api<Pod>,
}

impl KubeDrainer {
    pub fn new(client: Client) -> Self {
        KubeDrainer {
            nodes: Api::all(client.clone()),
            pods: Api::all(client),
        }
    }

    async fn set_unschedulable(&self, node: &str, unschedulable: bool) -> Result<(), Error> {
        let patch = Patch::Merge(serde_json::json!({ "spec": { "unschedulable": unschedulable } }));
        self.nodes
            .patch(node, &PatchParams::default(), &patch)
            .await?;
        Ok(())
    }

    async fn evictable_pods(&self, node: &str) -> Result<Vec<Pod>, Error> {
        let list = self
            .pods
            .list(&ListParams::default().fields(&format!("spec.nodeName={node}")))
            .await?;

        Ok(list
            .items
            .into_iter()
            .filter(|pod| !is_mirror_pod(pod) && !is_daemonset_pod(pod))
            .collect())
    }
}

#[async_trait::async_trait]
impl Drainer for KubeDrainer {
    async fn cordon(&self, node: &str) -> Result<(), Error> {
        tracing::info!(%node, "cordoning node");
        self.set_unschedulable(node, true).await
    }

    async fn uncordon(&self, node: &str) -> Result<(), Error> {
        tracing::info!(%node, "uncordoning node");
        self.set_unschedulable(node, false).await
    }

    async fn drain(&self, node: &str) -> Result<(), Error> {
        self.cordon(node).await?;

        tracing::info!(%node, "draining node");
        let pods = self.evictable_pods(node).await?;

        let mut pending: HashSet<(String, String)> = HashSet::new();
        for pod in &pods {
            let namespace = pod.metadata.namespace.clone().unwrap_or_default();
            let name = pod.metadata.name.clone().unwrap_or_default();
            tracing::info!(%node, %namespace, pod = %name, "evicting pod");

            let grace_period_seconds = pod
                .spec
                .as_ref()
                .and_then(|s| s.termination_grace_period_seconds)
                .map(|g| g.max(0) as u32);
            let evict_params = EvictParams {
                delete_options: grace_period_seconds.map(|grace_period_seconds| {
                    kube::api::DeleteParams {
                        grace_period_seconds: Some(grace_period_seconds),
                        ..Default::default()
                    }
                }),
                ..Default::default()
            };

            let pods_in_ns: Api<Pod> = Api::namespaced(self.pods.clone().into_client(), &namespace);
            pods_in_ns.evict(&name, &evict_params).await?;
            pending.insert((namespace, name));
        }

        let start = Instant::now();
        while !pending.is_empty() {
            if start.elapsed() > DRAIN_MAX_WAIT {
                tracing::warn!(%node, remaining = pending.len(), "drain wait budget exceeded, continuing");
                break;
            }

            let still_present: HashSet<(String, String)> = self
                .evictable_pods(node)
                .await?
                .into_iter()
                .map(|pod| {
                    (
                        pod.metadata.namespace.unwrap_or_default(),
                        pod.metadata.name.unwrap_or_default(),
                    )
                })
                .collect();
            pending.retain(|key| still_present.contains(key));

            if !pending.is_empty() {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        tracing::info!(%node, "drained node");
        Ok(())
    }
}

fn is_mirror_pod(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(MIRROR_POD_ANNOTATION))
}

fn is_daemonset_pod(pod: &Pod) -> bool {
    pod.metadata
        .owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.controller == Some(true) && r.kind == "DaemonSet"))
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Debug, Default, Clone)]
    pub struct DrainCall {
        pub cordoned: Vec<String>,
        pub uncordoned: Vec<String>,
        pub drained: Vec<String>,
    }

    /// Records every call made to it, for asserting the coordinator invokes the drainer
    /// the right number of times on the right node without needing a live cluster.
    pub struct MockDrainer {
        pub calls: Mutex<DrainCall>,
        pub fail_drain: bool,
    }

    impl MockDrainer {
        pub fn new() -> Self {
            MockDrainer {
                calls: Mutex::new(DrainCall::default()),
                fail_drain: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl Drainer for MockDrainer {
        async fn cordon(&self, node: &str) -> Result<(), Error> {
            self.calls.lock().await.cordoned.push(node.to_string());
            Ok(())
        }

        async fn uncordon(&self, node: &str) -> Result<(), Error> {
            self.calls.lock().await.uncordoned.push(node.to_string());
            Ok(())
        }

        async fn drain(&self, node: &str) -> Result<(), Error> {
            self.calls.lock().await.drained.push(node.to_string());
            if self.fail_drain {
                return Err(Error::NotFound(format!("simulated drain failure for {node}")));
            }
            Ok(())
        }
    }
}
