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

/// Shared handle to a cached value.
///
/// Cloning takes another reference, dropping releases one. A managed value is
/// destructed when its last handle is released; the store only ever releases
/// its own handles with the store lock dropped, so destructors are free to
/// call back into the store. A static value is borrowed for the program
/// lifetime, its handles are inert and it is never destructed.
#[derive(Clone)]
pub struct Resource {
    payload: Payload,
}

#[derive(Clone)]
enum Payload {
    Managed(Arc<dyn Any + Send + Sync>),
    Static(&'static (dyn Any + Send + Sync)),
}

impl Resource {
    /// Wrap a value in a managed, reference-counted handle.
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            payload: Payload::Managed(Arc::new(value)),
        }
    }

    /// Wrap a statically allocated value.
    ///
    /// The store links and indexes static entries like any other, but never
    /// counts references to them and never destructs them. Budget-driven
    /// eviction always skips them; only explicit removal, [`clear`] and store
    /// teardown unlink them.
    ///
    /// [`clear`]: crate::Store::clear
    pub fn from_static<T>(value: &'static T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            payload: Payload::Static(value),
        }
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        match &self.payload {
            Payload::Managed(value) => value.as_ref(),
            Payload::Static(value) => *value,
        }
    }

    /// Type tag of the concrete payload type.
    pub fn tag(&self) -> TypeId {
        self.as_any().type_id()
    }

    /// `true` if the payload is of concrete type `T`.
    pub fn is<T>(&self) -> bool
    where
        T: Any,
    {
        self.as_any().is::<T>()
    }

    /// Borrow the payload as concrete type `T`.
    pub fn downcast_ref<T>(&self) -> Option<&T>
    where
        T: Any,
    {
        self.as_any().downcast_ref()
    }

    /// Number of live handles to a managed value, or `None` for a static
    /// value.
    ///
    /// The count is a momentary snapshot; other holders may clone or drop
    /// handles concurrently.
    pub fn ref_count(&self) -> Option<usize> {
        match &self.payload {
            Payload::Managed(value) => Some(Arc::strong_count(value)),
            Payload::Static(_) => None,
        }
    }

    /// `true` if this handle borrows a statically allocated value.
    pub fn is_static(&self) -> bool {
        matches!(self.payload, Payload::Static(_))
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("refs", &self.ref_count())
            .field("tag", &self.tag())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_handles_are_counted() {
        let value = Resource::new(42u32);
        assert_eq!(value.ref_count(), Some(1));
        assert!(!value.is_static());

        let other = value.clone();
        assert_eq!(value.ref_count(), Some(2));
        assert_eq!(other.downcast_ref::<u32>(), Some(&42));

        drop(other);
        assert_eq!(value.ref_count(), Some(1));
    }

    #[test]
    fn static_handles_are_inert() {
        static SENTINEL: &str = "empty";

        let value = Resource::from_static(&SENTINEL);
        assert_eq!(value.ref_count(), None);
        assert!(value.is_static());

        let other = value.clone();
        assert_eq!(other.ref_count(), None);
        assert_eq!(other.downcast_ref::<&str>(), Some(&"empty"));
    }

    #[test]
    fn tags_discriminate_concrete_types() {
        let int = Resource::new(1u32);
        let text = Resource::new(String::from("1"));

        assert_ne!(int.tag(), text.tag());
        assert!(int.is::<u32>());
        assert!(!int.is::<String>());
        assert_eq!(int.downcast_ref::<String>(), None);
        assert_eq!(text.downcast_ref::<String>().map(String::as_str), Some("1"));
    }

    #[test]
    fn destructor_runs_on_last_release() {
        struct Probe(Arc<std::sync::atomic::AtomicUsize>);

        impl Drop for Probe {
            fn drop(&mut self) {
                self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }

        let drops = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let value = Resource::new(Probe(drops.clone()));
        let other = value.clone();

        drop(value);
        assert_eq!(drops.load(std::sync::atomic::Ordering::Relaxed), 0);
        drop(other);
        assert_eq!(drops.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
