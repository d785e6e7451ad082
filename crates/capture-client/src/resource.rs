//! Owned presentation resources.
//!
//! Previews and frames are handed to the presentation layer as opaque
//! [`ResourceId`]s allocated from a [`ResourceBackend`]. Each allocation is
//! owned by exactly one [`OwnedResource`]; dropping the owner releases the
//! id, so a resource cannot outlive its slot or presenter and cannot be
//! released twice.

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Opaque handle to a presentable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Raw numeric id
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res-{}", self.0)
    }
}

/// What a resource is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Capture slot preview
    Preview,
    /// Relay frame
    Frame,
}

/// Allocator for presentable resources.
///
/// `release` returns `false` when the id is not live, which callers treat as
/// a double release.
pub trait ResourceBackend: Send + Sync + fmt::Debug {
    /// Wrap bytes into a new resource.
    fn allocate(&self, kind: ResourceKind, mime_type: &str, data: &Bytes) -> ResourceId;

    /// Release a resource. Returns `false` if the id was not live.
    fn release(&self, id: ResourceId) -> bool;

    /// Whether the id is live.
    fn contains(&self, id: ResourceId) -> bool;
}

/// Exclusive owner of one allocated resource; releases it on drop.
pub struct OwnedResource {
    id: ResourceId,
    kind: ResourceKind,
    backend: Arc<dyn ResourceBackend>,
}

impl OwnedResource {
    /// Allocate a resource and take ownership of it.
    #[must_use]
    pub fn allocate(
        backend: &Arc<dyn ResourceBackend>,
        kind: ResourceKind,
        mime_type: &str,
        data: &Bytes,
    ) -> Self {
        let id = backend.allocate(kind, mime_type, data);
        Self {
            id,
            kind,
            backend: Arc::clone(backend),
        }
    }

    /// The owned id
    #[must_use]
    pub const fn id(&self) -> ResourceId {
        self.id
    }

    /// The resource kind
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }
}

impl fmt::Debug for OwnedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedResource")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Drop for OwnedResource {
    fn drop(&mut self) {
        if !self.backend.release(self.id) {
            warn!(
                target: "client.resource",
                resource_id = %self.id,
                kind = ?self.kind,
                "Resource was already released"
            );
        }
    }
}

/// A live resource held by [`InMemoryResources`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResource {
    pub kind: ResourceKind,
    pub mime_type: String,
    pub data: Bytes,
}

/// In-process resource backend.
///
/// Keeps live resources in a map and counts allocations and releases, which
/// makes leaks and double releases observable.
#[derive(Debug, Default)]
pub struct InMemoryResources {
    live: Mutex<HashMap<ResourceId, StoredResource>>,
    next_id: AtomicU64,
    allocated: AtomicU64,
    released: AtomicU64,
    rejected_releases: AtomicU64,
}

impl InMemoryResources {
    /// Create an empty backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty backend behind the trait object used by owners.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Contents of a live resource
    #[must_use]
    pub fn get(&self, id: ResourceId) -> Option<StoredResource> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Number of live resources
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Total successful allocations
    #[must_use]
    pub fn allocated_count(&self) -> u64 {
        self.allocated.load(Ordering::SeqCst)
    }

    /// Total successful releases
    #[must_use]
    pub fn released_count(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    /// Releases of ids that were not live
    #[must_use]
    pub fn rejected_release_count(&self) -> u64 {
        self.rejected_releases.load(Ordering::SeqCst)
    }
}

impl ResourceBackend for InMemoryResources {
    fn allocate(&self, kind: ResourceKind, mime_type: &str, data: &Bytes) -> ResourceId {
        let id = ResourceId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                StoredResource {
                    kind,
                    mime_type: mime_type.to_string(),
                    data: data.clone(),
                },
            );
        self.allocated.fetch_add(1, Ordering::SeqCst);
        id
    }

    fn release(&self, id: ResourceId) -> bool {
        let removed = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            self.released.fetch_add(1, Ordering::SeqCst);
        } else {
            self.rejected_releases.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    fn contains(&self, id: ResourceId) -> bool {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_resource_releases_on_drop() {
        let resources = InMemoryResources::shared();
        let backend: Arc<dyn ResourceBackend> = resources.clone();

        let owned = OwnedResource::allocate(
            &backend,
            ResourceKind::Preview,
            "image/png",
            &Bytes::from_static(b"png"),
        );
        let id = owned.id();
        assert!(resources.contains(id));
        assert_eq!(resources.get(id).map(|r| r.mime_type), Some("image/png".to_string()));

        drop(owned);
        assert!(!resources.contains(id));
        assert_eq!(resources.allocated_count(), 1);
        assert_eq!(resources.released_count(), 1);
        assert_eq!(resources.rejected_release_count(), 0);
    }

    #[test]
    fn test_double_release_is_rejected() {
        let resources = InMemoryResources::new();
        let id = resources.allocate(ResourceKind::Frame, "image/jpeg", &Bytes::new());

        assert!(resources.release(id));
        assert!(!resources.release(id));
        assert_eq!(resources.released_count(), 1);
        assert_eq!(resources.rejected_release_count(), 1);
    }

    #[test]
    fn test_ids_are_unique() {
        let resources = InMemoryResources::new();
        let a = resources.allocate(ResourceKind::Frame, "image/jpeg", &Bytes::new());
        let b = resources.allocate(ResourceKind::Frame, "image/jpeg", &Bytes::new());
        assert_ne!(a, b);
        assert_eq!(resources.live_count(), 2);
        assert_eq!(a.to_string(), format!("res-{}", a.get()));
    }
}
