//! Per-group reboot slot, persisted as a Kubernetes `coordination.k8s.io/v1` `Lease`.
//!
//! A `Lease` already gives us exactly the primitive FleetLock needs: a named record with
//! optimistic concurrency on `metadata.resourceVersion`. We reuse `holderIdentity` for the
//! slot's holder and `leaseTransitions` for the transition counter, rather than inventing a
//! bespoke CRD.

use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use kube::{
    Api, Client,
    api::{ObjectMeta, PostParams},
};

use crate::error::Error;

/// The shared mutable state of one group's reboot slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebootSlot {
    pub holder: String,
    pub transitions: i32,
}

impl RebootSlot {
    pub fn free() -> Self {
        RebootSlot {
            holder: String::new(),
            transitions: 0,
        }
    }

    pub fn is_free(&self) -> bool {
        self.holder.is_empty()
    }
}

/// Opaque token binding a `get` to the exact backing record version, so a later `update`
/// can detect whether another writer raced ahead.
pub struct SlotHandle(SlotHandleInner);

enum SlotHandleInner {
    Lease(Box<Lease>),
    #[cfg(test)]
    Mock { group: String, version: u64 },
}

pub enum UpdateOutcome {
    Ok,
    Conflict,
}

#[async_trait::async_trait]
pub trait SlotStore: Send + Sync {
    /// Reads the group's slot, auto-creating it (free, zero transitions) if absent.
    async fn get(&self, group: &str) -> Result<(RebootSlot, SlotHandle), Error>;

    /// Writes `new_slot` iff the backing record hasn't moved since `handle` was read.
    async fn update(&self, handle: SlotHandle, new_slot: RebootSlot) -> Result<UpdateOutcome, Error>;
}

fn lease_name(group: &str) -> String {
    format!("fleetlock-{group}")
}

fn slot_from_spec(spec: &LeaseSpec) -> RebootSlot {
    RebootSlot {
        holder: spec.holder_identity.clone().unwrap_or_default(),
        transitions: spec.lease_transitions.unwrap_or(0),
    }
}

fn spec_from_slot(slot: &RebootSlot) -> LeaseSpec {
    LeaseSpec {
        holder_identity: Some(slot.holder.clone()),
        lease_transitions: Some(slot.transitions),
        ..Default::default()
    }
}

/// A [`SlotStore`] backed by a Kubernetes `Lease` in the configured namespace.
pub struct KubeSlotStore {
    leases: Api<Lease>,
}

impl KubeSlotStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        KubeSlotStore {
            leases: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait::async_trait]
impl SlotStore for KubeSlotStore {
    async fn get(&self, group: &str) -> Result<(RebootSlot, SlotHandle), Error> {
        let name = lease_name(group);

        let lease = match self.leases.get(&name).await {
            Ok(lease) => lease,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                let created = Lease {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        ..Default::default()
                    },
                    spec: Some(spec_from_slot(&RebootSlot::free())),
                };
                self.leases.create(&PostParams::default(), &created).await?
            }
            Err(e) => return Err(Error::from(e)),
        };

        let slot = lease
            .spec
            .as_ref()
            .map(slot_from_spec)
            .unwrap_or_else(RebootSlot::free);

        Ok((slot, SlotHandle(SlotHandleInner::Lease(Box::new(lease)))))
    }

    async fn update(&self, handle: SlotHandle, new_slot: RebootSlot) -> Result<UpdateOutcome, Error> {
        let SlotHandleInner::Lease(mut lease) = handle.0 else {
            unreachable!("KubeSlotStore only produces Lease handles");
        };
        lease.spec = Some(spec_from_slot(&new_slot));
        let name = lease
            .metadata
            .name
            .clone()
            .expect("lease handle always carries a name");

        match self
            .leases
            .replace(&name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => Ok(UpdateOutcome::Ok),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(UpdateOutcome::Conflict),
            Err(e) => Err(Error::from(e)),
        }
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::{collections::HashMap, sync::Mutex};

    /// An in-memory [`SlotStore`] for coordinator unit tests, with the same
    /// optimistic-concurrency semantics as the Kubernetes-backed implementation.
    pub struct MockSlotStore {
        records: Mutex<HashMap<String, (RebootSlot, u64)>>,
    }

    impl MockSlotStore {
        pub fn new() -> Self {
            MockSlotStore {
                records: Mutex::new(HashMap::new()),
            }
        }

        pub fn inspect(&self, group: &str) -> RebootSlot {
            self.records
                .lock()
                .unwrap()
                .get(group)
                .map(|(slot, _)| slot.clone())
                .unwrap_or_else(RebootSlot::free)
        }
    }

    #[async_trait::async_trait]
    impl SlotStore for MockSlotStore {
        async fn get(&self, group: &str) -> Result<(RebootSlot, SlotHandle), Error> {
            let mut records = self.records.lock().unwrap();
            let (slot, version) = records
                .entry(group.to_string())
                .or_insert_with(|| (RebootSlot::free(), 0));
            Ok((
                slot.clone(),
                SlotHandle(SlotHandleInner::Mock {
                    group: group.to_string(),
                    version: *version,
                }),
            ))
        }

        async fn update(
            &self,
            handle: SlotHandle,
            new_slot: RebootSlot,
        ) -> Result<UpdateOutcome, Error> {
            let SlotHandleInner::Mock { group, version } = handle.0 else {
                unreachable!("MockSlotStore only produces Mock handles");
            };
            let mut records = self.records.lock().unwrap();
            let entry = records.entry(group).or_insert_with(|| (RebootSlot::free(), 0));
            if entry.1 != version {
                return Ok(UpdateOutcome::Conflict);
            }
            entry.0 = new_slot;
            entry.1 += 1;
            Ok(UpdateOutcome::Ok)
        }
    }
}
