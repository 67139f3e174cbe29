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

use std::sync::Arc;

use hashbrown::hash_table::{Entry, HashTable};

use crate::{key::RefKey, record::Record, strict_assert};

/// Hash index over the indirect-keyed entries of a store.
///
/// Hashes are computed by the caller before the store lock is taken. Each slot
/// owns a copy of its composite key and hash, so growth and comparison never
/// reach into entry payloads.
pub(crate) struct RefIndex {
    table: HashTable<Slot>,
}

struct Slot {
    refkey: RefKey,
    hash: u64,
    record: Arc<Record>,
}

impl RefIndex {
    pub(crate) fn new() -> Self {
        Self {
            table: HashTable::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.table.len()
    }

    /// Reserve headroom for one more slot, surfacing allocation failure
    /// instead of aborting.
    pub(crate) fn reserve_one(&mut self) -> bool {
        self.table.try_reserve(1, |slot| slot.hash).is_ok()
    }

    /// Insert an entry under its composite key.
    ///
    /// Returns `false` and leaves the table unchanged when an equal key is
    /// already present.
    pub(crate) fn insert(&mut self, hash: u64, refkey: RefKey, record: Arc<Record>) -> bool {
        match self
            .table
            .entry(hash, |slot| slot.refkey == refkey, |slot| slot.hash)
        {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                strict_assert!(!record.is_in_index());
                record.set_in_index(true);
                vacant.insert(Slot { refkey, hash, record });
                true
            }
        }
    }

    pub(crate) fn get(&self, hash: u64, refkey: &RefKey) -> Option<&Arc<Record>> {
        self.table
            .find(hash, |slot| slot.refkey == *refkey)
            .map(|slot| &slot.record)
    }

    /// Remove an entry under its composite key.
    pub(crate) fn remove(&mut self, hash: u64, refkey: &RefKey) -> Option<Arc<Record>> {
        match self
            .table
            .entry(hash, |slot| slot.refkey == *refkey, |slot| slot.hash)
        {
            Entry::Occupied(occupied) => {
                let (slot, _) = occupied.remove();
                strict_assert!(slot.record.is_in_index());
                slot.record.set_in_index(false);
                Some(slot.record)
            }
            Entry::Vacant(_) => None,
        }
    }
}
