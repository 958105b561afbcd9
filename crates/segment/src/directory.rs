//! Segment directory: resolves (collection, kind) to live segment instances.
//!
//! Segment configs come from an injected [`Catalog`] — the engine treats the
//! catalog as read-mostly reference data and never mutates it. Live instances
//! are cached in concurrent maps; get-or-create goes through the map's entry
//! API so concurrent callers can never race-create two segments for the same
//! collection.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{info, warn};

use tessera_core::{CollectionId, Error, Result};

use crate::metadata::{MetadataSegment, MetadataSegmentConfig};
use crate::vector::{VectorSegment, VectorSegmentConfig};

/// Segment configurations for one collection, as resolved by the catalog.
#[derive(Debug, Clone, Default)]
pub struct SegmentSpecs {
    /// Vector segment configuration
    pub vector: VectorSegmentConfig,
    /// Metadata segment configuration
    pub metadata: MetadataSegmentConfig,
}

/// Lookup service mapping collections to their segment configurations.
///
/// Implemented externally (the collection catalog); [`InMemoryCatalog`] is
/// the embedded implementation used when no external catalog exists.
pub trait Catalog: Send + Sync {
    /// Resolve the segment configurations for a collection.
    ///
    /// Returning `Err(SegmentUnavailable)` means the collection is unknown.
    fn resolve_segments(&self, collection: &CollectionId) -> Result<SegmentSpecs>;
}

/// In-process catalog backed by a concurrent map.
///
/// An optional default spec makes unknown collections resolvable on first
/// touch, which is the behavior embedded callers usually want.
pub struct InMemoryCatalog {
    specs: DashMap<CollectionId, SegmentSpecs>,
    default_specs: Option<SegmentSpecs>,
}

impl InMemoryCatalog {
    /// Catalog where every collection must be registered explicitly.
    pub fn new() -> Self {
        InMemoryCatalog {
            specs: DashMap::new(),
            default_specs: None,
        }
    }

    /// Catalog that resolves unregistered collections to `default_specs`.
    pub fn with_default(default_specs: SegmentSpecs) -> Self {
        InMemoryCatalog {
            specs: DashMap::new(),
            default_specs: Some(default_specs),
        }
    }

    /// Register (or replace) a collection's segment specs.
    pub fn register(&self, collection: CollectionId, specs: SegmentSpecs) {
        self.specs.insert(collection, specs);
    }

    /// Remove a collection's registration.
    pub fn deregister(&self, collection: &CollectionId) {
        self.specs.remove(collection);
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog for InMemoryCatalog {
    fn resolve_segments(&self, collection: &CollectionId) -> Result<SegmentSpecs> {
        if let Some(specs) = self.specs.get(collection) {
            return Ok(specs.clone());
        }
        if let Some(default_specs) = &self.default_specs {
            return Ok(default_specs.clone());
        }
        Err(Error::SegmentUnavailable {
            collection: collection.clone(),
            kind: "catalog".to_string(),
        })
    }
}

/// Cache of live segment instances, keyed by collection.
pub struct SegmentDirectory {
    catalog: Arc<dyn Catalog>,
    root: PathBuf,
    vectors: DashMap<CollectionId, Arc<VectorSegment>>,
    metadatas: DashMap<CollectionId, Arc<MetadataSegment>>,
}

impl SegmentDirectory {
    /// Create a directory rooted at `root`, resolving configs via `catalog`.
    pub fn new(root: impl Into<PathBuf>, catalog: Arc<dyn Catalog>) -> Self {
        SegmentDirectory {
            catalog,
            root: root.into(),
            vectors: DashMap::new(),
            metadatas: DashMap::new(),
        }
    }

    /// Get (or create and start) the vector segment of a collection.
    pub fn vector(&self, collection: &CollectionId) -> Result<Arc<VectorSegment>> {
        if let Some(segment) = self.vectors.get(collection) {
            return Ok(segment.clone());
        }

        match self.vectors.entry(collection.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let specs = self.catalog.resolve_segments(collection)?;
                let dir = self.segment_dir(collection, "vector");
                let segment = Arc::new(VectorSegment::new(collection.clone(), dir, specs.vector));
                segment.start()?;
                info!(collection = %collection, "vector segment created");
                entry.insert(segment.clone());
                Ok(segment)
            }
        }
    }

    /// Get (or create and start) the metadata segment of a collection.
    pub fn metadata(&self, collection: &CollectionId) -> Result<Arc<MetadataSegment>> {
        if let Some(segment) = self.metadatas.get(collection) {
            return Ok(segment.clone());
        }

        match self.metadatas.entry(collection.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let specs = self.catalog.resolve_segments(collection)?;
                let dir = self.segment_dir(collection, "metadata");
                let segment = Arc::new(MetadataSegment::new(
                    collection.clone(),
                    dir,
                    specs.metadata,
                ));
                segment.start()?;
                info!(collection = %collection, "metadata segment created");
                entry.insert(segment.clone());
                Ok(segment)
            }
        }
    }

    /// Flush both segments of every cached collection.
    pub fn flush_all(&self) -> Result<()> {
        for segment in self.vectors.iter() {
            segment.value().flush()?;
        }
        for segment in self.metadatas.iter() {
            segment.value().flush()?;
        }
        Ok(())
    }

    /// Stop and drop a collection's segments, removing their durable state.
    ///
    /// Part of the collection-deletion path: the segments are owned
    /// exclusively by the collection and die with it.
    pub fn drop_collection(&self, collection: &CollectionId) -> Result<()> {
        if let Some((_, segment)) = self.vectors.remove(collection) {
            if let Err(e) = segment.stop() {
                warn!(collection = %collection, error = %e, "vector segment stop failed during drop");
            }
        }
        if let Some((_, segment)) = self.metadatas.remove(collection) {
            if let Err(e) = segment.stop() {
                warn!(collection = %collection, error = %e, "metadata segment stop failed during drop");
            }
        }

        let dir = self.root.join(collection.as_str());
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        info!(collection = %collection, "collection segments dropped");
        Ok(())
    }

    fn segment_dir(&self, collection: &CollectionId, kind: &str) -> PathBuf {
        self.root.join(collection.as_str()).join(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn directory(root: &std::path::Path) -> SegmentDirectory {
        let catalog = Arc::new(InMemoryCatalog::with_default(SegmentSpecs {
            vector: VectorSegmentConfig::for_testing(),
            metadata: MetadataSegmentConfig::for_testing(),
        }));
        SegmentDirectory::new(root, catalog)
    }

    #[test]
    fn test_get_or_create_returns_same_instance() {
        let dir = tempdir().unwrap();
        let directory = directory(dir.path());
        let collection = CollectionId::new("docs");

        let a = directory.vector(&collection).unwrap();
        let b = directory.vector(&collection).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.id(), b.id());

        let m1 = directory.metadata(&collection).unwrap();
        let m2 = directory.metadata(&collection).unwrap();
        assert!(Arc::ptr_eq(&m1, &m2));
    }

    #[test]
    fn test_concurrent_get_or_create_single_instance() {
        let dir = tempdir().unwrap();
        let directory = Arc::new(directory(dir.path()));
        let collection = CollectionId::new("docs");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let directory = directory.clone();
                let collection = collection.clone();
                std::thread::spawn(move || directory.vector(&collection).unwrap().id())
            })
            .collect();

        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_unknown_collection_without_default() {
        let dir = tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::new());
        let directory = SegmentDirectory::new(dir.path(), catalog.clone());

        let collection = CollectionId::new("ghost");
        assert!(matches!(
            directory.vector(&collection),
            Err(Error::SegmentUnavailable { .. })
        ));

        // Registering the collection self-heals the lookup
        catalog.register(collection.clone(), SegmentSpecs::default());
        assert!(directory.vector(&collection).is_ok());
    }

    #[test]
    fn test_drop_collection_removes_state() {
        let dir = tempdir().unwrap();
        let directory = directory(dir.path());
        let collection = CollectionId::new("docs");

        let segment = directory.vector(&collection).unwrap();
        segment.flush().unwrap();
        assert!(dir.path().join("docs").exists());

        directory.drop_collection(&collection).unwrap();
        assert!(!dir.path().join("docs").exists());

        // Dropping again is harmless
        directory.drop_collection(&collection).unwrap();
    }
}
