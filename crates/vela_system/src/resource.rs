//! Read-only global resources.
//!
//! Global resources hold configuration that is fixed once the server has been
//! built: runtime tuning, the active tracing setup, runtime metadata. They are
//! stored by type and handed out by shared reference.

use core::any::{Any, TypeId};
use hashbrown::HashMap;

/// Marker trait for global, read-only resources.
///
/// # Example
///
/// ```
/// use vela_system::resource::GlobalResource;
///
/// struct ListenerConfig {
///     port: u16,
/// }
///
/// impl GlobalResource for ListenerConfig {}
/// ```
pub trait GlobalResource: Send + Sync + 'static {}

/// Type-keyed storage for [`GlobalResource`] values.
#[derive(Default)]
pub struct Globals {
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl core::fmt::Debug for Globals {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Globals")
            .field("len", &self.entries.len())
            .finish()
    }
}

impl Globals {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a resource, returning the previous value of the same type.
    pub fn insert<R: GlobalResource>(&mut self, resource: R) -> Option<R> {
        self.entries
            .insert(TypeId::of::<R>(), Box::new(resource))
            .and_then(|old| old.downcast::<R>().ok())
            .map(|boxed| *boxed)
    }

    /// Returns a reference to the resource of type `R`.
    #[must_use]
    pub fn get<R: GlobalResource>(&self) -> Option<&R> {
        self.entries
            .get(&TypeId::of::<R>())
            .and_then(|boxed| boxed.downcast_ref::<R>())
    }

    /// Returns true if a resource of type `R` is stored.
    #[must_use]
    pub fn contains<R: GlobalResource>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<R>())
    }

    /// Removes and returns the resource of type `R`.
    pub fn remove<R: GlobalResource>(&mut self) -> Option<R> {
        self.entries
            .remove(&TypeId::of::<R>())
            .and_then(|old| old.downcast::<R>().ok())
            .map(|boxed| *boxed)
    }

    /// Returns the number of stored resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no resources are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
