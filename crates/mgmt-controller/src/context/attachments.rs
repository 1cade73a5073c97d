//! Typed per-operation scratch space shared by the steps of one operation.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// A typed key into [`Attachments`]. Declare keys as constants:
///
/// ```rust
/// use mgmt_controller::context::AttachmentKey;
///
/// const STARTED: AttachmentKey<Vec<String>> = AttachmentKey::new("started-workers");
/// ```
pub struct AttachmentKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AttachmentKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for AttachmentKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttachmentKey<T> {}

impl<T> fmt::Debug for AttachmentKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttachmentKey({})", self.name)
    }
}

#[derive(Default)]
pub struct Attachments {
    values: HashMap<(TypeId, &'static str), Box<dyn Any + Send + Sync>>,
}

impl Attachments {
    /// Stores `value`, returning the previous value under the same key.
    pub fn attach<T: Send + Sync + 'static>(&mut self, key: AttachmentKey<T>, value: T) -> Option<T> {
        self.values
            .insert((TypeId::of::<T>(), key.name), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T: Send + Sync + 'static>(&self, key: AttachmentKey<T>) -> Option<&T> {
        self.values
            .get(&(TypeId::of::<T>(), key.name))
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self, key: AttachmentKey<T>) -> Option<&mut T> {
        self.values
            .get_mut(&(TypeId::of::<T>(), key.name))
            .and_then(|v| v.downcast_mut::<T>())
    }

    pub fn detach<T: Send + Sync + 'static>(&mut self, key: AttachmentKey<T>) -> Option<T> {
        self.values
            .remove(&(TypeId::of::<T>(), key.name))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
