//! Maps a FleetLock client id back to the Kubernetes `Node` it was computed from.

use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client, api::ListParams};

use crate::error::Error;
use crate::identity;

#[derive(Debug, Clone)]
pub struct ResolvedNode {
    pub name: String,
}

#[async_trait::async_trait]
pub trait NodeResolver: Send + Sync {
    /// Returns the node whose derived id matches `client_id`, or `None` if no node in the
    /// current inventory matches. A miss is not an error: the node may legitimately be
    /// absent from the cluster view (e.g. already rebooting).
    async fn resolve(&self, client_id: &str) -> Result<Option<ResolvedNode>, Error>;
}

pub struct KubeNodeResolver {
    nodes: Api<Node>,
}

impl KubeNodeResolver {
    pub fn new(client: Client) -> Self {
        KubeNodeResolver {
            nodes: Api::all(client),
        }
    }
}

#[async_trait::async_trait]
impl NodeResolver for KubeNodeResolver {
    async fn resolve(&self, client_id: &str) -> Result<Option<ResolvedNode>, Error> {
        let nodes = self.nodes.list(&ListParams::default()).await?;

        for node in nodes.items {
            let Some(system_uuid) = node
                .status
                .as_ref()
                .and_then(|s| s.node_info.as_ref())
                .map(|info| info.system_uuid.as_str())
            else {
                continue;
            };

            let Ok(derived) = identity::derive(system_uuid) else {
                continue;
            };

            if derived.eq_ignore_ascii_case(client_id) {
                let name = node.metadata.name.clone().unwrap_or_default();
                tracing::info!(%client_id, node = %name, "request matches Kubernetes node");
                return Ok(Some(ResolvedNode { name }));
            }
        }

        tracing::info!(%client_id, "request matches no Kubernetes node");
        Ok(None)
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;

    pub struct MockNodeResolver {
        by_client_id: HashMap<String, String>,
    }

    impl MockNodeResolver {
        pub fn new(by_client_id: HashMap<String, String>) -> Self {
            MockNodeResolver { by_client_id }
        }
    }

    #[async_trait::async_trait]
    impl NodeResolver for MockNodeResolver {
        async fn resolve(&self, client_id: &str) -> Result<Option<ResolvedNode>, Error> {
            Ok(self
                .by_client_id
                .get(client_id)
                .map(|name| ResolvedNode { name: name.clone() }))
        }
    }
}
