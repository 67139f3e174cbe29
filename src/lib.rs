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

//! larder is a size-bounded, refcount-gated object store for document
//! processing engines.
//!
//! Decoded objects such as images, fonts and glyph renditions are expensive to
//! rebuild, so an engine keeps them in a [`Store`] under a byte budget. Values
//! are shared through cloneable [`Resource`] handles; an entry only becomes
//! reclaimable once the store holds the sole handle to its value, which makes
//! the reference count itself the pinning mechanism. Entries are keyed either
//! by document object identity ([`StoreKey::Indirect`], resolved through a
//! hash index) or by a structurally compared key object
//! ([`StoreKey::Direct`], resolved by a recency-ordered scan), and lookups are
//! narrowed by the value's concrete type.
//!
//! Beyond transparent budget-driven eviction the store exposes the explicit
//! reclamation knobs an engine wires into its allocator: [`Store::scavenge`]
//! for phased out-of-memory handling, [`Store::shrink`] and [`Store::resize`].
//! All state sits behind one coarse lock, and value destructors always run
//! with that lock released, so destructors may call back into the store.
//!
//! # Example
//!
//! ```
//! use larder::{Capacity, Resource, Store, StoreKey};
//!
//! let store = Store::new(Capacity::Bounded(64 * 1024));
//!
//! let glyphs = Resource::new(vec![1u8, 2, 3]);
//! store.insert(StoreKey::indirect(12, 0), &glyphs, 3);
//! drop(glyphs);
//!
//! let hit = store.find::<Vec<u8>>(&StoreKey::indirect(12, 0)).expect("resident");
//! assert_eq!(hit.downcast_ref::<Vec<u8>>(), Some(&vec![1u8, 2, 3]));
//! ```

mod assert;
mod error;
mod index;
mod key;
mod metrics;
mod record;
mod resource;
mod store;
mod usage;

pub use crate::{
    error::{Error, Result},
    key::{DirectKey, ObjectId, StoreKey},
    metrics::Metrics,
    resource::Resource,
    store::{Capacity, ScavengePhase, Store},
};
