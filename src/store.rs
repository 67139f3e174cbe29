//  Copyright 2026 larder Project Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use std::{
    any::{Any, TypeId},
    fmt,
    hash::BuildHasher,
    sync::Arc,
};

use ahash::RandomState;
use itertools::Itertools;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    index::RefIndex,
    key::{RefKey, StoreKey},
    metrics::Metrics,
    record::{Data, Record},
    resource::Resource,
    strict_assert, strict_assert_eq,
    usage::UsageList,
};

/// Byte hint handed to the scavenger when the hash index fails to grow.
const INDEX_GROWTH_HINT: usize = 4096;

/// Byte budget of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capacity {
    /// Finite budget in bytes. `Bounded(0)` rejects every insertion with a
    /// non-zero charge.
    Bounded(usize),
    /// No budget. Insertions charge the running total but never evict.
    Unlimited,
}

/// Aggressiveness cursor of [`Store::scavenge`].
///
/// Owned by the caller and threaded unchanged through the retry loop of an
/// out-of-memory handler, so that repeated calls for the same allocation
/// reclaim more and more of the store. Starts at the gentlest phase.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScavengePhase(u32);

impl ScavengePhase {
    /// Number of phases before the retained ceiling reaches zero.
    pub const LIMIT: u32 = 16;

    /// The gentlest phase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw phase counter, mostly useful for diagnostics.
    pub fn value(&self) -> u32 {
        self.0
    }
}

/// Mutable state of a store, all of it guarded by one mutex.
struct State {
    usage: UsageList,
    index: RefIndex,
    /// Sum of the byte charges of all linked entries.
    size: usize,
    capacity: Capacity,
    entries: usize,
    metrics: Metrics,
}

struct Shared {
    state: Mutex<State>,
    hasher: RandomState,
}

/// Size-bounded, refcount-gated object store.
///
/// Values are shared through [`Resource`] handles. An entry only becomes
/// evictable by budget pressure once the store holds the sole handle to its
/// value; entries whose values are still referenced elsewhere are pinned and
/// only explicit removal can unlink them.
///
/// `Store` is a shared-ownership handle: cloning takes another owner, and
/// dropping the last owner evicts every remaining entry unconditionally
/// before the store itself is freed. All operations take one coarse lock, and
/// value destructors always run with that lock released.
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
}

/// An entry may be reclaimed by budget pressure only while the store holds
/// the sole handle to its managed value. Static values never qualify.
///
/// # Safety
///
/// The caller must hold the store lock.
unsafe fn evictable(record: &Record) -> bool {
    unsafe { record.resource() }.ref_count() == Some(1)
}

/// Bytes charged to entries that [`evictable`] would reclaim right now.
fn reclaimable(state: &State) -> usize {
    let mut total = 0usize;
    let mut cursor = state.usage.lru();
    while let Some(record) = cursor.get() {
        // Safety: `&State` is only reachable through the lock guard.
        if unsafe { evictable(record) } {
            total = total.saturating_add(record.size());
        }
        cursor.move_next();
    }
    total
}

impl Shared {
    /// Disconnect a linked entry from the usage list and, for indirect keys,
    /// the hash index, and uncharge it. The caller must release the returned
    /// payload with the lock dropped.
    fn detach(&self, state: &mut State, record: &Arc<Record>) -> Data {
        let record = state.usage.unlink(record);
        strict_assert!(state.size >= record.size());
        strict_assert!(state.entries >= 1);
        state.size -= record.size();
        state.entries -= 1;
        // Safety: lock held, the entry was linked until just now.
        let data = unsafe { record.take() };
        if let StoreKey::Indirect(id) = &data.key {
            let refkey = RefKey { id: *id, tag: data.resource.tag() };
            let hash = self.hasher.hash_one(&refkey);
            let indexed = state.index.remove(hash, &refkey);
            strict_assert!(indexed.as_ref().is_some_and(|indexed| Arc::ptr_eq(indexed, &record)));
        }
        data
    }

    /// Evict one linked entry, releasing its payload with the lock dropped so
    /// a managed destructor can call back into the store, then reacquire the
    /// lock. `pin` is released inside the same window, after the destructor
    /// returns. Store state may change arbitrarily across the gap.
    fn evict<'a>(
        &'a self,
        mut state: MutexGuard<'a, State>,
        record: &Arc<Record>,
        pin: Option<Resource>,
    ) -> MutexGuard<'a, State> {
        let data = self.detach(&mut state, record);
        state.metrics.evict += 1;
        drop(state);
        tracing::trace!(key = ?data.key, size = record.size(), "[store]: evict entry");
        drop(data);
        drop(pin);
        self.state.lock()
    }

    /// Free at least `tofree` bytes by evicting reclaimable entries from the
    /// least recently used end, or free nothing at all when the reclaimable
    /// set cannot cover the target. Returns the bytes actually freed.
    fn ensure_space<'a>(
        &'a self,
        mut state: MutexGuard<'a, State>,
        tofree: usize,
    ) -> (MutexGuard<'a, State>, usize) {
        // First pass: check the target is coverable before evicting anything.
        let mut covered = 0usize;
        let mut feasible = false;
        {
            let mut cursor = state.usage.lru();
            while let Some(record) = cursor.get() {
                // Safety: lock held.
                if unsafe { evictable(record) } {
                    covered = covered.saturating_add(record.size());
                    if covered >= tofree {
                        feasible = true;
                        break;
                    }
                }
                cursor.move_next();
            }
        }
        if !feasible {
            return (state, 0);
        }

        // Second pass: evict reclaimable entries oldest first. Before each
        // unlocked teardown the neighbor toward the newer end is remembered
        // and its value pinned, so a destructor calling back into the store
        // cannot evict the resume point. If the neighbor got unlinked across
        // the gap anyway, the walk restarts from the oldest end.
        let mut freed = 0usize;
        let mut resume: Option<Arc<Record>> = None;
        loop {
            let mut victim = None;
            let mut neighbor = None;
            {
                let mut cursor = match resume.take() {
                    // Safety: the `IN_LIST` flag witnesses membership under
                    // the lock.
                    Some(record) if record.is_in_list() => unsafe { state.usage.cursor_at(&record) },
                    _ => state.usage.lru(),
                };
                while let Some(record) = cursor.get() {
                    // Safety: lock held.
                    if unsafe { evictable(record) } {
                        victim = cursor.clone_pointer();
                        cursor.move_next();
                        neighbor = cursor.clone_pointer();
                        break;
                    }
                    cursor.move_next();
                }
            }
            let Some(victim) = victim else { break };
            freed += victim.size();
            // Safety: lock held.
            let pin = neighbor.as_ref().map(|record| unsafe { record.resource() }.clone());
            state = self.evict(state, &victim, pin);
            resume = neighbor;
            if freed >= tofree {
                break;
            }
        }
        (state, freed)
    }

    /// Scavenge pass: evict reclaimable entries oldest first until `tofree`
    /// bytes are freed or nothing reclaimable is left, restarting from the
    /// (possibly changed) oldest end after every unlocked teardown. No
    /// feasibility check and no resume pin; the worst case scans the list
    /// once per eviction.
    fn sweep<'a>(
        &'a self,
        mut state: MutexGuard<'a, State>,
        tofree: usize,
    ) -> (MutexGuard<'a, State>, usize) {
        let mut freed = 0usize;
        loop {
            let mut victim = None;
            {
                let mut cursor = state.usage.lru();
                while let Some(record) = cursor.get() {
                    // Safety: lock held.
                    if unsafe { evictable(record) } {
                        victim = cursor.clone_pointer();
                        break;
                    }
                    cursor.move_next();
                }
            }
            let Some(victim) = victim else { break };
            freed += victim.size();
            state = self.evict(state, &victim, None);
            if freed >= tofree {
                break;
            }
        }
        (state, freed)
    }

    /// One run of the phased reclamation loop. Each phase lowers the ceiling
    /// of bytes the store is allowed to retain; the run ends as soon as one
    /// sweep makes progress, or once the gentlest useful phase is exhausted.
    fn scavenge_with<'a>(
        &'a self,
        mut state: MutexGuard<'a, State>,
        requested: usize,
        phase: &mut ScavengePhase,
    ) -> (MutexGuard<'a, State>, bool) {
        loop {
            let ceiling = if phase.0 >= ScavengePhase::LIMIT {
                0
            } else {
                let left = (ScavengePhase::LIMIT - phase.0) as usize;
                match state.capacity {
                    Capacity::Bounded(max) => max / 16 * left,
                    Capacity::Unlimited => state.size / left * (left - 1),
                }
            };
            phase.0 = phase.0.saturating_add(1);
            let tofree = match requested.checked_add(state.size) {
                None => usize::MAX - ceiling,
                Some(need) if need > ceiling => need - ceiling,
                Some(_) => {
                    // Already under the ceiling; retry at the next phase.
                    if ceiling > 0 {
                        continue;
                    }
                    break;
                }
            };
            tracing::debug!(
                phase = phase.0,
                ceiling,
                tofree,
                size = state.size,
                "[store]: scavenge pass"
            );
            let (relocked, freed) = self.sweep(state, tofree);
            state = relocked;
            if freed > 0 {
                return (state, true);
            }
            if ceiling == 0 {
                break;
            }
        }
        (state, false)
    }

    /// Unconditional eviction of every entry, newest first. Destructors may
    /// refill the store while it runs; the loop keeps going until nothing is
    /// left.
    fn drain(&self) {
        let mut state = self.state.lock();
        loop {
            let Some(record) = state.usage.mru().clone_pointer() else { break };
            state = self.evict(state, &record, None);
        }
        strict_assert_eq!(state.entries, 0);
        strict_assert_eq!(state.size, 0);
        strict_assert_eq!(state.index.len(), 0);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.drain();
    }
}

impl Store {
    /// Create a store with the given byte budget.
    pub fn new(capacity: Capacity) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    usage: UsageList::new(),
                    index: RefIndex::new(),
                    size: 0,
                    capacity,
                    entries: 0,
                    metrics: Metrics::default(),
                }),
                hasher: RandomState::new(),
            }),
        }
    }

    /// Store a value under a key with an explicit byte charge, linking the
    /// entry at the most recently used end.
    ///
    /// Best effort: the insertion is abandoned, with the store unchanged,
    /// when the budget cannot make room out of reclaimable entries, when the
    /// hash index cannot grow, or when an equal indirect key already holds a
    /// value of the same type. The caller's own handle is unaffected either
    /// way.
    pub fn insert(&self, key: StoreKey, resource: &Resource, size: usize) {
        let indexed = match &key {
            StoreKey::Indirect(id) => {
                let refkey = RefKey { id: *id, tag: resource.tag() };
                Some((refkey, self.shared.hasher.hash_one(&refkey)))
            }
            StoreKey::Direct(_) => None,
        };
        let record = Arc::new(Record::new(key, resource.clone(), size));

        let mut state = self.shared.state.lock();
        if let Capacity::Bounded(max) = state.capacity {
            // Reclaim until the charge fits. Destructors running in the
            // eviction windows may grow the store again, so the need is
            // re-read every round.
            loop {
                let need = state.size.saturating_add(size);
                if need <= max {
                    break;
                }
                let (relocked, freed) = self.shared.ensure_space(state, need - max);
                state = relocked;
                if freed == 0 {
                    state.metrics.reject += 1;
                    drop(state);
                    // `record` still holds a value handle, but so does the
                    // caller, so dropping it here cannot destruct.
                    tracing::trace!(size, "[store]: insert rejected, no reclaimable space");
                    return;
                }
            }
        }
        state.size += size;

        if let Some((refkey, hash)) = indexed {
            let mut phase = ScavengePhase::default();
            while !state.index.reserve_one() {
                let (relocked, progress) =
                    self.shared.scavenge_with(state, INDEX_GROWTH_HINT, &mut phase);
                state = relocked;
                if !progress {
                    state.size -= size;
                    state.metrics.reject += 1;
                    drop(state);
                    tracing::trace!(size, "[store]: insert rejected, index growth failed");
                    return;
                }
            }
            if !state.index.insert(hash, refkey, record.clone()) {
                // An equal key is already resident; keep the existing entry.
                state.size -= size;
                state.metrics.reject += 1;
                return;
            }
        }

        state.usage.push_mru(record);
        state.entries += 1;
        state.metrics.insert += 1;
    }

    /// Look up the value of concrete type `T` stored under a key.
    ///
    /// A hit promotes the entry to the most recently used end and returns a
    /// fresh handle, pinning the entry against budget-driven eviction until
    /// the handle is released. Indirect keys resolve through the hash index;
    /// direct keys scan the usage list from the most recently used end.
    pub fn find<T>(&self, key: &StoreKey) -> Option<Resource>
    where
        T: Any,
    {
        let tag = TypeId::of::<T>();
        match key {
            StoreKey::Indirect(id) => {
                let refkey = RefKey { id: *id, tag };
                let hash = self.shared.hasher.hash_one(&refkey);
                let mut state = self.shared.state.lock();
                let Some(record) = state.index.get(hash, &refkey).cloned() else {
                    state.metrics.miss += 1;
                    return None;
                };
                state.usage.promote(&record);
                state.metrics.hit += 1;
                // Safety: lock held, the entry is linked.
                Some(unsafe { record.resource() }.clone())
            }
            StoreKey::Direct(direct) => {
                let mut state = self.shared.state.lock();
                let found = {
                    let mut cursor = state.usage.mru();
                    loop {
                        let Some(record) = cursor.get() else { break None };
                        // Safety: lock held.
                        let matches = unsafe {
                            record.resource().tag() == tag
                                && record.key().matches_direct(direct.as_ref())
                        };
                        if matches {
                            break cursor.clone_pointer();
                        }
                        cursor.move_prev();
                    }
                };
                let Some(record) = found else {
                    state.metrics.miss += 1;
                    return None;
                };
                state.usage.promote(&record);
                state.metrics.hit += 1;
                // Safety: lock held, the entry is linked.
                Some(unsafe { record.resource() }.clone())
            }
        }
    }

    /// Remove the entry of concrete type `T` stored under a key, regardless
    /// of how many handles to its value exist.
    ///
    /// The store's handles are released with the lock dropped; the value is
    /// destructed there only if no caller handle remains. Does nothing when
    /// no such entry is resident.
    pub fn remove<T>(&self, key: &StoreKey)
    where
        T: Any,
    {
        let tag = TypeId::of::<T>();
        let mut state = self.shared.state.lock();
        let found = match key {
            StoreKey::Indirect(id) => {
                let refkey = RefKey { id: *id, tag };
                let hash = self.shared.hasher.hash_one(&refkey);
                state.index.get(hash, &refkey).cloned()
            }
            StoreKey::Direct(direct) => {
                let mut cursor = state.usage.mru();
                loop {
                    let Some(record) = cursor.get() else { break None };
                    // Safety: lock held.
                    let matches = unsafe {
                        record.resource().tag() == tag
                            && record.key().matches_direct(direct.as_ref())
                    };
                    if matches {
                        break cursor.clone_pointer();
                    }
                    cursor.move_prev();
                }
            }
        };
        let Some(record) = found else { return };
        let data = self.shared.detach(&mut state, &record);
        state.metrics.remove += 1;
        drop(state);
        drop(data);
    }

    /// Evict every entry unconditionally, pinned and static ones included.
    ///
    /// Handles held by callers stay valid; managed values without caller
    /// handles are destructed with the lock released.
    pub fn clear(&self) {
        self.shared.drain();
    }

    /// Reclaim store memory on behalf of an out-of-memory handler trying to
    /// allocate `requested` bytes.
    ///
    /// `phase` makes repeated calls increasingly aggressive; thread it
    /// unchanged through the caller's retry loop. Returns `true` when at
    /// least one entry was evicted and retrying the allocation is worthwhile,
    /// `false` when this call made no progress.
    pub fn scavenge(&self, requested: usize, phase: &mut ScavengePhase) -> bool {
        let state = self.shared.state.lock();
        let (_state, progress) = self.shared.scavenge_with(state, requested, phase);
        progress
    }

    /// Evict reclaimable entries, oldest first, until usage drops to
    /// `percent` of its current value. Returns `true` when the target was
    /// reached.
    pub fn shrink(&self, percent: u8) -> bool {
        if percent >= 100 {
            return true;
        }
        let state = self.shared.state.lock();
        let target = (state.size as u128 * percent as u128 / 100) as usize;
        if state.size <= target {
            return true;
        }
        let tofree = state.size - target;
        let (state, _freed) = self.shared.sweep(state, tofree);
        state.size <= target
    }

    /// Change the byte budget at runtime.
    ///
    /// Lowering the budget evicts reclaimable entries until usage fits. When
    /// pinned entries keep usage above the new budget the budget still takes
    /// effect for future insertions, and [`Error::NoSpace`] reports the
    /// shortfall.
    pub fn resize(&self, capacity: Capacity) -> Result<()> {
        tracing::debug!(?capacity, "[store]: resize");
        let mut state = self.shared.state.lock();
        state.capacity = capacity;
        if let Capacity::Bounded(max) = capacity {
            while state.size > max {
                let tofree = state.size - max;
                let (relocked, freed) = self.shared.ensure_space(state, tofree);
                state = relocked;
                if freed == 0 {
                    let resident = state.size;
                    let pinned = resident - reclaimable(&state);
                    return Err(Error::NoSpace { capacity: max, resident, pinned });
                }
            }
        }
        Ok(())
    }

    /// Bytes currently charged to linked entries.
    pub fn usage(&self) -> usize {
        self.shared.state.lock().size
    }

    /// Current byte budget.
    pub fn capacity(&self) -> Capacity {
        self.shared.state.lock().capacity
    }

    /// Number of linked entries.
    pub fn len(&self) -> usize {
        self.shared.state.lock().entries
    }

    /// `true` when no entry is linked.
    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().usage.is_empty()
    }

    /// Snapshot of the operation counters.
    pub fn metrics(&self) -> Metrics {
        self.shared.state.lock().metrics
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        let entries = state
            .usage
            .iter()
            .rev()
            .map(|record| {
                // Safety: lock held, all iterated entries are linked.
                let (key, refs) = unsafe { (record.key().clone(), record.resource().ref_count()) };
                EntryDump { key, refs, size: record.size() }
            })
            .collect_vec();
        f.debug_struct("Store")
            .field("capacity", &state.capacity)
            .field("usage", &state.size)
            .field("entries", &entries)
            .finish()
    }
}

/// One usage list entry as reported by the [`Store`] `Debug` dump, newest
/// first.
#[derive(Debug)]
struct EntryDump {
    key: StoreKey,
    refs: Option<usize>,
    size: usize,
}
