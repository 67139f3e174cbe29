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

use intrusive_collections::{
    intrusive_adapter,
    linked_list::{Cursor, Iter},
    LinkedList, LinkedListAtomicLink,
};

use crate::{record::Record, strict_assert};

intrusive_adapter! { pub(crate) RecordAdapter = Arc<Record>: Record { link: LinkedListAtomicLink } }

/// Usage list of a store.
///
/// The back of the list is the most recently used end, the front the least
/// recently used end. Membership is witnessed by the record's `IN_LIST` flag,
/// which the pointer-based cursor constructors rely on.
pub(crate) struct UsageList {
    list: LinkedList<RecordAdapter>,
}

impl UsageList {
    pub(crate) fn new() -> Self {
        Self {
            list: LinkedList::new(RecordAdapter::new()),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Link an entry at the most recently used end.
    pub(crate) fn push_mru(&mut self, record: Arc<Record>) {
        strict_assert!(!record.is_in_list());
        record.set_in_list(true);
        self.list.push_back(record);
    }

    /// Unlink an entry from anywhere in the list.
    pub(crate) fn unlink(&mut self, record: &Arc<Record>) -> Arc<Record> {
        strict_assert!(record.is_in_list());
        // Safety: the `IN_LIST` flag witnesses membership.
        let unlinked = unsafe {
            self.list
                .cursor_mut_from_ptr(Arc::as_ptr(record))
                .remove()
                .unwrap()
        };
        unlinked.set_in_list(false);
        unlinked
    }

    /// Relink an entry at the most recently used end.
    pub(crate) fn promote(&mut self, record: &Arc<Record>) {
        let record = self.unlink(record);
        self.push_mru(record);
    }

    /// Cursor at the least recently used end; `move_next` walks toward the
    /// most recently used end.
    pub(crate) fn lru(&self) -> Cursor<'_, RecordAdapter> {
        self.list.front()
    }

    /// Cursor at the most recently used end; `move_prev` walks toward the
    /// least recently used end.
    pub(crate) fn mru(&self) -> Cursor<'_, RecordAdapter> {
        self.list.back()
    }

    /// Cursor positioned at a linked entry.
    ///
    /// # Safety
    ///
    /// `record` must currently be linked in this list.
    pub(crate) unsafe fn cursor_at(&self, record: &Arc<Record>) -> Cursor<'_, RecordAdapter> {
        unsafe { self.list.cursor_from_ptr(Arc::as_ptr(record)) }
    }

    /// Iterate from the least recently used end to the most recently used end.
    pub(crate) fn iter(&self) -> Iter<'_, RecordAdapter> {
        self.list.iter()
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;
    use crate::{key::StoreKey, resource::Resource};

    fn record(num: u32) -> Arc<Record> {
        Arc::new(Record::new(
            StoreKey::indirect(num, 0),
            Resource::new(num),
            num as usize,
        ))
    }

    fn sizes(list: &UsageList) -> Vec<usize> {
        list.iter().map(Record::size).collect_vec()
    }

    #[test]
    fn push_links_at_the_mru_end() {
        let mut list = UsageList::new();
        assert!(list.is_empty());

        for num in 1..=3 {
            list.push_mru(record(num));
        }
        assert_eq!(sizes(&list), vec![1, 2, 3]);
        assert_eq!(list.lru().get().map(Record::size), Some(1));
        assert_eq!(list.mru().get().map(Record::size), Some(3));
    }

    #[test]
    fn promote_relinks_at_the_mru_end() {
        let mut list = UsageList::new();
        let records = (1..=3).map(record).collect_vec();
        for record in &records {
            list.push_mru(record.clone());
        }

        list.promote(&records[0]);
        assert_eq!(sizes(&list), vec![2, 3, 1]);

        list.promote(&records[2]);
        assert_eq!(sizes(&list), vec![2, 1, 3]);
    }

    #[test]
    fn unlink_removes_from_anywhere() {
        let mut list = UsageList::new();
        let records = (1..=3).map(record).collect_vec();
        for record in &records {
            list.push_mru(record.clone());
        }

        let unlinked = list.unlink(&records[1]);
        assert!(!unlinked.is_in_list());
        assert_eq!(sizes(&list), vec![1, 3]);

        list.unlink(&records[0]);
        list.unlink(&records[2]);
        assert!(list.is_empty());
    }

    #[test]
    fn cursors_walk_both_directions() {
        let mut list = UsageList::new();
        for num in 1..=4 {
            list.push_mru(record(num));
        }

        let mut walked = vec![];
        let mut cursor = list.mru();
        while let Some(record) = cursor.get() {
            walked.push(record.size());
            cursor.move_prev();
        }
        assert_eq!(walked, vec![4, 3, 2, 1]);

        let mut cursor = list.lru();
        cursor.move_next();
        assert_eq!(cursor.get().map(Record::size), Some(2));
    }
}
