//! The consistent-hash-style placement ring.
//!
//! Maps a chunk fingerprint to an owning node and supports live insertion
//! of a new node that splits an existing arc. See `SPEC_FULL.md` §4.1 for
//! the placement algorithm this module implements.

use std::sync::{Arc, Weak};

use log::info;
use tokio::sync::RwLock;

use crate::error::{collect_results, Result, StorageError};
use crate::fingerprint::{Fingerprint, RING_SECTORS};
use crate::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Preparing,
    Ready,
}

struct Slot {
    node_id: String,
    handle: Weak<dyn Node>,
    state: Readiness,
    /// Sector of the previous occupied slot in ring order, `None` if this
    /// is the only occupied slot.
    prev: Option<u32>,
    next: Option<u32>,
}

struct RingInner {
    slots: Vec<Option<Slot>>,
    active: usize,
}

impl RingInner {
    fn new() -> Self {
        let mut slots = Vec::with_capacity(RING_SECTORS as usize);
        slots.resize_with(RING_SECTORS as usize, || None);
        Self { slots, active: 0 }
    }

    fn link_before(&mut self, new_sector: u32, before_sector: u32, node_id: String, handle: Weak<dyn Node>) {
        let prev_sector = self.slots[before_sector as usize].as_ref().unwrap().prev;

        self.slots[new_sector as usize] = Some(Slot {
            node_id,
            handle,
            state: Readiness::Preparing,
            prev: prev_sector,
            next: Some(before_sector),
        });

        if let Some(p) = prev_sector {
            self.slots[p as usize].as_mut().unwrap().next = Some(new_sector);
        }
        self.slots[before_sector as usize].as_mut().unwrap().prev = Some(new_sector);
        self.active += 1;
    }
}

/// Result of [`Ring::insert`]: the arc the newcomer must pull from the
/// incumbent. `arc_end_new == arc_end_old` signals that no transfer is
/// needed (the cluster had no prior members).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitArc {
    pub arc_start: u32,
    pub arc_end_new: u32,
    pub arc_end_old: u32,
}

pub struct Ring {
    inner: RwLock<RingInner>,
}

impl Default for Ring {
    fn default() -> Self {
        Self::new()
    }
}

impl Ring {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RingInner::new()),
        }
    }

    /// Insert a new node into the ring, returning the arc it must pull
    /// from the current incumbent. See SPEC_FULL.md §4.1 for the three
    /// placement cases.
    pub async fn insert(&self, node_id: String, handle: Weak<dyn Node>) -> Result<SplitArc> {
        let active = self.inner.read().await.active;

        if active == 0 {
            let mut inner = self.inner.write().await;
            let sector = RING_SECTORS - 1;
            inner.slots[sector as usize] = Some(Slot {
                node_id,
                handle,
                state: Readiness::Preparing,
                prev: None,
                next: None,
            });
            inner.active = 1;
            return Ok(SplitArc {
                arc_start: 0,
                arc_end_new: sector,
                arc_end_old: sector,
            });
        }

        if active == 1 {
            let mut inner = self.inner.write().await;
            let existing = first_occupied_sector(&inner.slots).expect("active == 1 implies one slot");
            let new_sector = RING_SECTORS / 2 - 1;
            inner.link_before(new_sector, existing, node_id, handle);
            return Ok(SplitArc {
                arc_start: 0,
                arc_end_new: new_sector,
                arc_end_old: existing,
            });
        }

        // Case >= 2: probe usage on every existing node in parallel,
        // without holding the ring lock across the round trip.
        let candidates: Vec<(u32, String, Weak<dyn Node>)> = {
            let inner = self.inner.read().await;
            let mut out = Vec::new();
            let mut cursor = first_occupied_sector(&inner.slots);
            let start = cursor;
            while let Some(sector) = cursor {
                let slot = inner.slots[sector as usize].as_ref().unwrap();
                out.push((sector, slot.node_id.clone(), slot.handle.clone()));
                cursor = slot.next;
                if cursor == start {
                    break;
                }
            }
            out
        };

        let probes = candidates.iter().map(|(sector, _node_id, handle)| {
            let handle = handle.clone();
            let sector = *sector;
            async move {
                let node = handle
                    .upgrade()
                    .ok_or(StorageError::NotFound)?;
                node.get_usage().await.map(|usage| (sector, usage))
            }
        });
        let probe_results: Vec<Result<(u32, f64)>> = futures::future::join_all(probes).await;
        let usages = collect_results(probe_results)?;

        let victim = usages
            .into_iter()
            .fold(None, |best: Option<(u32, f64)>, (sector, usage)| match best {
                Some((_, best_usage)) if best_usage >= usage => best,
                _ => Some((sector, usage)),
            })
            .map(|(sector, _)| sector)
            .expect("active >= 2 implies at least one candidate");

        let mut inner = self.inner.write().await;
        let victim_slot = inner.slots[victim as usize]
            .as_ref()
            .ok_or(StorageError::NotFound)?;
        let predecessor = victim_slot.prev.unwrap_or(0);
        let new_sector = (predecessor + victim) / 2;

        inner.link_before(new_sector, victim, node_id, handle);

        Ok(SplitArc {
            arc_start: predecessor,
            arc_end_new: new_sector,
            arc_end_old: victim,
        })
    }

    /// Flip a node's slot to READY. Idempotent; no-op if the node is
    /// unknown (it may already have been superseded).
    pub async fn mark_ready(&self, node_id: &str) {
        let mut inner = self.inner.write().await;
        for slot in inner.slots.iter_mut().flatten() {
            if slot.node_id == node_id {
                if slot.state != Readiness::Ready {
                    info!("ring: node {} is now READY", node_id);
                }
                slot.state = Readiness::Ready;
                return;
            }
        }
    }

    /// Resolve a sector to its owning node: scan forward from `sector`
    /// (mod S) for the first READY slot, skipping PREPARING ones.
    pub async fn resolve(&self, sector: u32) -> Result<(Arc<dyn Node>, String)> {
        let inner = self.inner.read().await;
        for i in 0..RING_SECTORS {
            let idx = (sector + i) % RING_SECTORS;
            if let Some(slot) = &inner.slots[idx as usize] {
                if slot.state == Readiness::Ready {
                    if let Some(node) = slot.handle.upgrade() {
                        return Ok((node, slot.node_id.clone()));
                    }
                }
            }
        }
        Err(StorageError::NoReadyNode)
    }

    pub async fn resolve_chunk(&self, chunk: &Fingerprint) -> Result<(Arc<dyn Node>, String)> {
        self.resolve(chunk.sector()).await
    }
}

fn first_occupied_sector(slots: &[Option<Slot>]) -> Option<u32> {
    slots
        .iter()
        .position(|s| s.is_some())
        .map(|i| i as u32)
}
