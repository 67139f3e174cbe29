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
    sync::Arc,
};

use serde::{Deserialize, Serialize};

/// Identity of an indirect document object.
///
/// The pair stays meaningful for the lifetime of the document, so it can be
/// hashed and compared without touching the object it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    /// Object number.
    pub num: u32,
    /// Generation number.
    pub gen: u16,
}

impl ObjectId {
    /// Create an identity from an object number and a generation number.
    pub fn new(num: u32, gen: u16) -> Self {
        Self { num, gen }
    }
}

/// Structurally compared key object for directly keyed entries.
///
/// Implemented for free on any `'static + Send + Sync + Debug + PartialEq`
/// type. Keys of different concrete types never compare equal.
pub trait DirectKey: Any + Send + Sync + fmt::Debug {
    /// Upcast for concrete-type comparison.
    fn as_any(&self) -> &dyn Any;

    /// Structural equality against another key object.
    fn dyn_eq(&self, other: &dyn DirectKey) -> bool;
}

impl<T> DirectKey for T
where
    T: Any + Send + Sync + fmt::Debug + PartialEq,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn DirectKey) -> bool {
        other.as_any().downcast_ref::<Self>().is_some_and(|other| self == other)
    }
}

/// Key of a stored entry.
///
/// Indirect keys resolve through the hash index in O(1). Direct keys carry a
/// shared key object compared structurally by a scan of the usage list in
/// recency order. Lookups of either kind are further narrowed by the value's
/// type tag, so the same key may cache values of several types side by side.
#[derive(Debug, Clone)]
pub enum StoreKey {
    /// Identity-keyed entry.
    Indirect(ObjectId),
    /// Structurally keyed entry.
    Direct(Arc<dyn DirectKey>),
}

impl StoreKey {
    /// Build an indirect key from an object number and a generation number.
    pub fn indirect(num: u32, gen: u16) -> Self {
        Self::Indirect(ObjectId::new(num, gen))
    }

    /// Build a direct key from a structurally compared key object.
    pub fn direct(key: impl DirectKey) -> Self {
        Self::Direct(Arc::new(key))
    }

    /// Identity pair if this key is indirect.
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            Self::Indirect(id) => Some(*id),
            Self::Direct(_) => None,
        }
    }

    /// Structural match against a direct key object. Always false for
    /// indirect keys.
    pub(crate) fn matches_direct(&self, key: &dyn DirectKey) -> bool {
        match self {
            Self::Direct(own) => own.dyn_eq(key),
            Self::Indirect(_) => false,
        }
    }
}

impl From<ObjectId> for StoreKey {
    fn from(id: ObjectId) -> Self {
        Self::Indirect(id)
    }
}

impl PartialEq for StoreKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Indirect(lhs), Self::Indirect(rhs)) => lhs == rhs,
            (Self::Direct(lhs), Self::Direct(rhs)) => lhs.dyn_eq(rhs.as_ref()),
            _ => false,
        }
    }
}

/// Composite key of the hash index: object identity plus value type tag.
///
/// Owned copies live in the index slots so rehashing and comparison never
/// reach into entry payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RefKey {
    pub id: ObjectId,
    pub tag: TypeId,
}
