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
    cell::UnsafeCell,
    sync::atomic::{AtomicU64, Ordering},
};

use bitflags::bitflags;
use intrusive_collections::LinkedListAtomicLink;

use crate::{key::StoreKey, resource::Resource};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Flags: u64 {
        const IN_LIST = 0b00000001;
        const IN_INDEX = 0b00000010;
    }
}

/// Owned payload of an entry: the key and the store's own value handle.
///
/// Taken out of the record as one unit when the entry is detached, so both
/// handles can be released after the store lock is dropped.
pub(crate) struct Data {
    pub key: StoreKey,
    pub resource: Resource,
}

/// A store entry.
///
/// Records are linked into the usage list and, for indirect keys, referenced
/// from the hash index. The payload is guarded by the store lock; the byte
/// charge and membership flags are freely readable.
pub(crate) struct Record {
    data: UnsafeCell<Option<Data>>,
    size: usize,
    flags: AtomicU64,
    /// Intrusive link of the usage list.
    pub(crate) link: LinkedListAtomicLink,
}

// Safety: `data` is only accessed with the store lock held.
unsafe impl Send for Record {}
unsafe impl Sync for Record {}

impl Record {
    pub(crate) fn new(key: StoreKey, resource: Resource, size: usize) -> Self {
        Self {
            data: UnsafeCell::new(Some(Data { key, resource })),
            size,
            flags: AtomicU64::new(Flags::empty().bits()),
            link: LinkedListAtomicLink::new(),
        }
    }

    /// Byte charge of the entry.
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Key of the entry.
    ///
    /// # Safety
    ///
    /// The caller must hold the store lock, and the entry must not have been
    /// detached yet.
    pub(crate) unsafe fn key(&self) -> &StoreKey {
        unsafe { &(*self.data.get()).as_ref().unwrap().key }
    }

    /// The store's own handle to the value.
    ///
    /// # Safety
    ///
    /// The caller must hold the store lock, and the entry must not have been
    /// detached yet.
    pub(crate) unsafe fn resource(&self) -> &Resource {
        unsafe { &(*self.data.get()).as_ref().unwrap().resource }
    }

    /// Move the payload out for release outside the lock.
    ///
    /// # Safety
    ///
    /// The caller must hold the store lock, and the payload must be taken at
    /// most once per record.
    pub(crate) unsafe fn take(&self) -> Data {
        unsafe { (*self.data.get()).take().unwrap() }
    }

    /// Set usage list membership with [`Ordering::Release`].
    pub(crate) fn set_in_list(&self, val: bool) {
        self.set_flags(Flags::IN_LIST, val, Ordering::Release);
    }

    /// Get usage list membership with [`Ordering::Acquire`].
    pub(crate) fn is_in_list(&self) -> bool {
        self.get_flags(Flags::IN_LIST, Ordering::Acquire)
    }

    /// Set hash index membership with [`Ordering::Release`].
    pub(crate) fn set_in_index(&self, val: bool) {
        self.set_flags(Flags::IN_INDEX, val, Ordering::Release);
    }

    /// Get hash index membership with [`Ordering::Acquire`].
    pub(crate) fn is_in_index(&self) -> bool {
        self.get_flags(Flags::IN_INDEX, Ordering::Acquire)
    }

    fn set_flags(&self, flags: Flags, val: bool, order: Ordering) {
        match val {
            true => self.flags.fetch_or(flags.bits(), order),
            false => self.flags.fetch_and(!flags.bits(), order),
        };
    }

    fn get_flags(&self, flags: Flags, order: Ordering) -> bool {
        self.flags.load(order) & flags.bits() == flags.bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        Record::new(StoreKey::indirect(1, 0), Resource::new(7u8), 16)
    }

    #[test]
    fn flags_are_independent() {
        let record = record();
        assert!(!record.is_in_list());
        assert!(!record.is_in_index());

        record.set_in_list(true);
        record.set_in_index(true);
        assert!(record.is_in_list());
        assert!(record.is_in_index());

        record.set_in_list(false);
        assert!(!record.is_in_list());
        assert!(record.is_in_index());
    }

    #[test]
    fn take_moves_the_payload_out() {
        let record = record();
        // Safety: single threaded, taken once.
        let data = unsafe { record.take() };
        assert_eq!(data.key, StoreKey::indirect(1, 0));
        assert_eq!(data.resource.downcast_ref::<u8>(), Some(&7));
        assert_eq!(record.size(), 16);
    }
}
