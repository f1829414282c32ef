//! Deduplicating, reference-counted route-info pool.
//!
//! Entries live in an arena of generation-tagged slots. An ordered index
//! keyed by insertion serial gives newest-first iteration; unlinking an entry
//! empties its slot and drops its index key, with no neighbour bookkeeping.
//!
//! Callers hold entries through [`FibInfoRef`] handles. Every handle accounts
//! for one reference: cloning a handle takes a reference, dropping one
//! releases it. The drop that takes the count to zero unlinks the entry,
//! releases its device references and reclaims it.
//!
//! Each entry carries a lifecycle state moved forward with compare-and-swap:
//!
//! ```text
//! Live --(last release, under pool lock)--> Unlinking --(reclaim)--> Freed
//! ```
//!
//! Any other transition is a lifecycle violation and panics.

use log::debug;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::device::DeviceRegistry;
use crate::error::{FibError, Result};
use crate::nexthop::NextHop;
use crate::request::RouteRequest;
use crate::route_info::RouteInfo;

/// Stable identifier of a pool entry.
///
/// The generation distinguishes successive occupants of the same slot, so an
/// id never resolves to an entry other than the one it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FibInfoId {
    index: u32,
    generation: u32,
}

impl FibInfoId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for FibInfoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fi{}.{}", self.index, self.generation)
    }
}

/// Lifecycle state of a pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LifeState {
    Live = 0,
    Unlinking = 1,
    Freed = 2,
}

impl LifeState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => LifeState::Live,
            1 => LifeState::Unlinking,
            _ => LifeState::Freed,
        }
    }
}

/// Atomic lifecycle cell shared by an entry and its handles.
#[derive(Debug)]
pub(crate) struct EntryState(AtomicU8);

impl EntryState {
    fn new() -> Self {
        Self(AtomicU8::new(LifeState::Live as u8))
    }

    pub(crate) fn load(&self) -> LifeState {
        LifeState::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Moves `from` to `to`. On failure returns the state actually found.
    pub(crate) fn transition(&self, from: LifeState, to: LifeState) -> std::result::Result<(), LifeState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(LifeState::from_raw)
    }
}

/// One registered route-info entry.
#[derive(Debug)]
pub(crate) struct PoolEntry {
    pub(crate) info: RouteInfo,
    pub(crate) refcount: u32,
    serial: u64,
    state: Arc<EntryState>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<PoolEntry>,
}

#[derive(Debug, Default)]
struct PoolInner {
    slots: Vec<Slot>,
    /// Vacant slot indices.
    free: Vec<u32>,
    /// Insertion serial -> slot index, oldest first.
    order: BTreeMap<u64, u32>,
    next_serial: u64,
}

impl PoolInner {
    fn get(&self, id: FibInfoId) -> Option<&PoolEntry> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    fn get_mut(&mut self, id: FibInfoId) -> Option<&mut PoolEntry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    fn id_of(&self, index: u32) -> FibInfoId {
        FibInfoId {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    /// Ids of all entries, newest first.
    fn ids_newest_first(&self) -> Vec<FibInfoId> {
        self.order
            .values()
            .rev()
            .map(|&index| self.id_of(index))
            .collect()
    }

    fn find_equivalent(&self, candidate: &RouteInfo) -> Option<FibInfoId> {
        self.order.values().rev().find_map(|&index| {
            let entry = self.slots[index as usize].entry.as_ref()?;
            entry
                .info
                .is_equivalent(candidate)
                .then(|| self.id_of(index))
        })
    }

    /// Registers `info` with one reference.
    fn link(&mut self, info: RouteInfo, state: Arc<EntryState>) -> FibInfoId {
        let serial = self.next_serial;
        self.next_serial += 1;
        let entry = PoolEntry {
            info,
            refcount: 1,
            serial,
            state,
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].entry = Some(entry);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                (self.slots.len() - 1) as u32
            }
        };
        self.order.insert(serial, index);
        self.id_of(index)
    }

    /// Removes the entry from the arena and the ordered index.
    fn unlink(&mut self, id: FibInfoId) -> Option<PoolEntry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.order.remove(&entry.serial);
        self.free.push(id.index);
        Some(entry)
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    inserted: AtomicU64,
    reused: AtomicU64,
    freed: AtomicU64,
}

struct PoolShared {
    inner: Mutex<PoolInner>,
    registry: Arc<dyn DeviceRegistry>,
    max_entries: usize,
    counters: PoolCounters,
}

impl PoolShared {
    /// Takes one more reference on a registered entry.
    fn add_ref(&self, id: FibInfoId) {
        let mut inner = self.inner.lock();
        match inner.get_mut(id) {
            Some(entry) => entry.refcount += 1,
            None => panic!("FibInfoPool: reference taken on reclaimed entry {}", id),
        }
    }

    /// Drops one reference; the last one unlinks and reclaims the entry.
    fn release(&self, id: FibInfoId) {
        let unlinked = {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.get_mut(id) else {
                panic!("FibInfoPool: release of reclaimed entry {}", id);
            };
            if entry.refcount == 0 {
                panic!("FibInfoPool: release of unreferenced entry {}", id);
            }
            entry.refcount -= 1;
            if entry.refcount > 0 {
                return;
            }
            if let Err(found) = entry.state.transition(LifeState::Live, LifeState::Unlinking) {
                panic!("FibInfoPool: unlinking entry {} found in state {:?}", id, found);
            }
            inner.unlink(id)
        };

        if let Some(entry) = unlinked {
            debug!("FibInfoPool: unlinked {}", id);
            self.free_dead(entry);
        }
    }

    /// Reclaims an unlinked entry, dropping its device references.
    ///
    /// Panics if the entry is still referenced or was not unlinked first.
    fn free_dead(&self, mut entry: PoolEntry) {
        if entry.refcount != 0 {
            panic!(
                "FibInfoPool: freeing entry with {} references outstanding",
                entry.refcount
            );
        }
        if let Err(found) = entry.state.transition(LifeState::Unlinking, LifeState::Freed) {
            panic!("FibInfoPool: freeing entry in state {:?}", found);
        }
        entry.info.release_devices(self.registry.as_ref());
        self.counters.freed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Counting handle to a pool entry.
pub struct FibInfoRef {
    shared: Arc<PoolShared>,
    id: FibInfoId,
    state: Arc<EntryState>,
}

impl FibInfoRef {
    pub fn id(&self) -> FibInfoId {
        self.id
    }

    /// Current number of references on the entry.
    pub fn refcount(&self) -> u32 {
        self.shared
            .inner
            .lock()
            .get(self.id)
            .map(|e| e.refcount)
            .unwrap_or(0)
    }

    /// Lifecycle state. Always `Live` while any handle exists.
    pub fn state(&self) -> LifeState {
        self.state.load()
    }

    /// Copy of the current descriptor.
    pub fn info(&self) -> RouteInfo {
        self.with_info(RouteInfo::clone)
    }

    /// Runs `f` on the descriptor under the pool lock.
    ///
    /// `f` must not call back into the pool or clone a handle.
    pub fn with_info<R>(&self, f: impl FnOnce(&RouteInfo) -> R) -> R {
        let inner = self.shared.inner.lock();
        match inner.get(self.id) {
            Some(entry) => f(&entry.info),
            None => panic!("FibInfoPool: handle to reclaimed entry {}", self.id),
        }
    }

    /// Returns true if no next hop of the entry is usable.
    pub fn is_unreachable(&self) -> bool {
        self.with_info(|info| info.is_dead())
    }

    /// Picks a live next hop for a flow hash.
    pub fn select_nexthop(&self, hash: u32) -> Option<NextHop> {
        self.with_info(|info| info.select_nexthop(hash).cloned())
    }
}

impl Clone for FibInfoRef {
    fn clone(&self) -> Self {
        self.shared.add_ref(self.id);
        Self {
            shared: self.shared.clone(),
            id: self.id,
            state: self.state.clone(),
        }
    }
}

impl Drop for FibInfoRef {
    fn drop(&mut self) {
        self.shared.release(self.id);
    }
}

impl PartialEq for FibInfoRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared) && self.id == other.id
    }
}

impl Eq for FibInfoRef {}

impl fmt::Debug for FibInfoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FibInfoRef")
            .field("id", &self.id)
            .field("state", &self.state.load())
            .finish()
    }
}

/// Point-in-time copy of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySnapshot {
    pub id: FibInfoId,
    pub refcount: u32,
    pub info: RouteInfo,
}

/// Pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Live entries.
    pub entries: usize,
    /// Candidates registered as new entries.
    pub inserted: u64,
    /// Candidates discarded in favour of an equivalent entry.
    pub reused: u64,
    /// Entries reclaimed after their last release.
    pub freed: u64,
}

/// Registry of shared route-info entries.
///
/// Cloning the pool clones a reference to the same registry.
#[derive(Clone)]
pub struct FibInfoPool {
    shared: Arc<PoolShared>,
}

impl FibInfoPool {
    /// Creates an empty pool holding at most `max_entries` entries.
    pub fn new(registry: Arc<dyn DeviceRegistry>, max_entries: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                inner: Mutex::new(PoolInner::default()),
                registry,
                max_entries,
                counters: PoolCounters::default(),
            }),
        }
    }

    fn handle(&self, id: FibInfoId, state: Arc<EntryState>) -> FibInfoRef {
        FibInfoRef {
            shared: self.shared.clone(),
            id,
            state,
        }
    }

    /// Registers `candidate` or reuses an equivalent entry.
    ///
    /// The search and the registration happen under one lock acquisition, so
    /// concurrent inserts of equivalent candidates yield a single entry.
    /// A discarded candidate, or one rejected because the pool is full, has
    /// its device references released.
    pub fn insert(&self, mut candidate: RouteInfo) -> Result<FibInfoRef> {
        let mut inner = self.shared.inner.lock();

        let reused = inner.find_equivalent(&candidate).and_then(|id| {
            let entry = inner.get_mut(id)?;
            entry.refcount += 1;
            debug!("FibInfoPool: reusing {} (refcount {})", id, entry.refcount);
            Some((id, entry.state.clone()))
        });
        if let Some((id, state)) = reused {
            drop(inner);

            candidate.release_devices(self.shared.registry.as_ref());
            self.shared.counters.reused.fetch_add(1, Ordering::Relaxed);
            return Ok(self.handle(id, state));
        }

        if inner.len() >= self.shared.max_entries {
            drop(inner);
            candidate.release_devices(self.shared.registry.as_ref());
            return Err(FibError::PoolExhausted(self.shared.max_entries));
        }

        let state = Arc::new(EntryState::new());
        let nhs = candidate.nhs();
        let id = inner.link(candidate, state.clone());
        let entries = inner.len();
        drop(inner);

        debug!(
            "FibInfoPool: inserted {} with {} next hops ({} entries)",
            id, nhs, entries
        );
        self.shared.counters.inserted.fetch_add(1, Ordering::Relaxed);
        Ok(self.handle(id, state))
    }

    /// Returns a new reference to the newest entry equivalent to `candidate`.
    pub fn find_equivalent(&self, candidate: &RouteInfo) -> Option<FibInfoRef> {
        let mut inner = self.shared.inner.lock();
        let id = inner.find_equivalent(candidate)?;
        let entry = inner.get_mut(id)?;
        entry.refcount += 1;
        let state = entry.state.clone();
        drop(inner);
        Some(self.handle(id, state))
    }

    /// Returns references to every entry a delete request designates,
    /// newest first.
    pub fn find_matching(&self, request: &RouteRequest, multipath: &[NextHop]) -> Vec<FibInfoRef> {
        let mut matched = Vec::new();
        let mut inner = self.shared.inner.lock();
        for id in inner.ids_newest_first() {
            if let Some(entry) = inner.get_mut(id) {
                if entry.info.matches_request(request, multipath) {
                    entry.refcount += 1;
                    matched.push((id, entry.state.clone()));
                }
            }
        }
        drop(inner);

        matched
            .into_iter()
            .map(|(id, state)| self.handle(id, state))
            .collect()
    }

    /// Releases a handle. Equivalent to dropping it.
    pub fn release(&self, entry: FibInfoRef) {
        debug!("FibInfoPool: release {}", entry.id());
        drop(entry);
    }

    /// Copies every entry with its reference count, newest first.
    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        let inner = self.shared.inner.lock();
        inner
            .ids_newest_first()
            .into_iter()
            .filter_map(|id| {
                inner.get(id).map(|entry| EntrySnapshot {
                    id,
                    refcount: entry.refcount,
                    info: entry.info.clone(),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shared.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        let counters = &self.shared.counters;
        PoolStats {
            entries: self.len(),
            inserted: counters.inserted.load(Ordering::Relaxed),
            reused: counters.reused.load(Ordering::Relaxed),
            freed: counters.freed.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn registry(&self) -> &dyn DeviceRegistry {
        self.shared.registry.as_ref()
    }

    /// Runs `f` on every entry, newest first, under the pool lock.
    pub(crate) fn for_each_entry_mut(&self, mut f: impl FnMut(FibInfoId, &mut RouteInfo)) {
        let mut inner = self.shared.inner.lock();
        for id in inner.ids_newest_first() {
            if let Some(entry) = inner.get_mut(id) {
                f(id, &mut entry.info);
            }
        }
    }
}

impl fmt::Debug for FibInfoPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FibInfoPool")
            .field("entries", &self.len())
            .field("max_entries", &self.shared.max_entries)
            .finish()
    }
}
