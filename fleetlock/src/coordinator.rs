//! The FleetLock state machine: acquires, retains and releases the per-group reboot slot.

use std::sync::Arc;

use crate::drain::Drainer;
use crate::error::Error;
use crate::metrics;
use crate::nodes::NodeResolver;
use crate::slot::{RebootSlot, SlotStore, UpdateOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Obtained,
    Retained,
    Held { holder: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockOutcome {
    Unlocked,
    AlreadyUnlocked,
    Held { holder: String },
}

pub struct Coordinator {
    slots: Arc<dyn SlotStore>,
    nodes: Arc<dyn NodeResolver>,
    drainer: Arc<dyn Drainer>,
}

impl Coordinator {
    pub fn new(
        slots: Arc<dyn SlotStore>,
        nodes: Arc<dyn NodeResolver>,
        drainer: Arc<dyn Drainer>,
    ) -> Self {
        Coordinator {
            slots,
            nodes,
            drainer,
        }
    }

    /// Handles a `/v1/pre-reboot` request for client `id` in `group`.
    pub async fn lock(&self, id: &str, group: &str) -> Result<LockOutcome, Error> {
        metrics::record_lock_request();

        let (slot, handle) = self.slots.get(group).await?;

        if slot.holder == id {
            tracing::info!(%group, client = %id, "retaining reboot lease");
            metrics::set_lock_state(group, true);
            metrics::set_lock_transition_count(group, slot.transitions);
            self.spawn_drain(id, group);
            return Ok(LockOutcome::Retained);
        }

        if !slot.is_free() {
            tracing::info!(%group, client = %id, holder = %slot.holder, "reboot lease held by another client");
            metrics::set_lock_state(group, true);
            return Ok(LockOutcome::Held {
                holder: slot.holder,
            });
        }

        let new_slot = RebootSlot {
            holder: id.to_string(),
            transitions: slot.transitions + 1,
        };
        match self.slots.update(handle, new_slot.clone()).await? {
            UpdateOutcome::Ok => {
                tracing::info!(%group, client = %id, "obtained reboot lease");
                metrics::set_lock_state(group, true);
                metrics::set_lock_transition_count(group, new_slot.transitions);
                self.spawn_drain(id, group);
                Ok(LockOutcome::Obtained)
            }
            UpdateOutcome::Conflict => {
                // Another writer raced ahead of us. Re-read and report the now-current
                // state instead of retrying the update ourselves.
                let (current, _) = self.slots.get(group).await?;
                tracing::info!(%group, client = %id, holder = %current.holder, "lost the race to obtain reboot lease");
                metrics::set_lock_state(group, !current.is_free());
                Ok(LockOutcome::Held {
                    holder: current.holder,
                })
            }
        }
    }

    /// Handles a `/v1/steady-state` request for client `id` in `group`.
    pub async fn unlock(&self, id: &str, group: &str) -> Result<UnlockOutcome, Error> {
        metrics::record_unlock_request();

        let (slot, handle) = self.slots.get(group).await?;

        if slot.is_free() {
            tracing::info!(%group, client = %id, "reboot lease already unlocked");
            metrics::set_lock_state(group, false);
            return Ok(UnlockOutcome::AlreadyUnlocked);
        }

        if slot.holder != id {
            tracing::info!(%group, client = %id, holder = %slot.holder, "refusing unlock from non-holder");
            metrics::set_lock_state(group, true);
            return Ok(UnlockOutcome::Held {
                holder: slot.holder,
            });
        }

        if let Some(node) = self.nodes.resolve(id).await? {
            self.drainer.uncordon(&node.name).await?;
        } else {
            tracing::warn!(%group, client = %id, "no matching node to uncordon");
        }

        let new_slot = RebootSlot {
            holder: String::new(),
            transitions: slot.transitions,
        };
        match self.slots.update(handle, new_slot.clone()).await? {
            UpdateOutcome::Ok => {
                tracing::info!(%group, client = %id, "unlocked reboot lease");
                metrics::set_lock_state(group, false);
                metrics::set_lock_transition_count(group, new_slot.transitions);
                Ok(UnlockOutcome::Unlocked)
            }
            UpdateOutcome::Conflict => {
                let (current, _) = self.slots.get(group).await?;
                tracing::info!(%group, client = %id, holder = %current.holder, "unlock raced with another transition");
                Ok(UnlockOutcome::Held {
                    holder: current.holder,
                })
            }
        }
    }

    /// Best-effort: resolves the requesting client to a node and drains it off the
    /// response critical path. Failures are logged, never surfaced to the caller.
    fn spawn_drain(&self, id: &str, group: &str) {
        let nodes = Arc::clone(&self.nodes);
        let drainer = Arc::clone(&self.drainer);
        let id = id.to_string();
        let group = group.to_string();

        tokio::spawn(async move {
            let node = match nodes.resolve(&id).await {
                Ok(Some(node)) => node,
                Ok(None) => {
                    tracing::warn!(%group, client = %id, "no matching node to drain");
                    return;
                }
                Err(e) => {
                    tracing::warn!(%group, client = %id, error = %e, "node resolution failed, skipping drain");
                    return;
                }
            };

            if let Err(e) = drainer.drain(&node.name).await {
                tracing::warn!(%group, client = %id, node = %node.name, error = %e, "drain failed");
            }
        });
    }
}
