//! In-memory gallery: the identities loaded from the store, mirrored into
//! the engine's search index. Searches and rebuilds are serialized by one
//! lock so a search never sees a half-loaded gallery.

use facegate_core::{Embedding, EngineError, Identity, IdentityStore, MatchResult, RecognitionEngine, StoreError};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
}

pub struct Gallery {
    engine: Arc<dyn RecognitionEngine>,
    store: Arc<dyn IdentityStore>,
    capacity: usize,
    table: Mutex<Vec<Identity>>,
}

impl Gallery {
    pub fn new(engine: Arc<dyn RecognitionEngine>, store: Arc<dyn IdentityStore>, capacity: usize) -> Self {
        Self {
            engine,
            store,
            capacity,
            table: Mutex::new(Vec::new()),
        }
    }

    /// Reload up to `capacity` identities from the store and hand them to
    /// the engine. The store is read under the gallery lock, so concurrent
    /// rebuilds complete in the order they read the store.
    pub fn rebuild(&self) -> Result<usize, GalleryError> {
        let mut table = self.table.lock();
        let identities = self.store.load_all(self.capacity)?;
        self.engine.release_gallery();
        table.clear();
        self.engine.load_gallery(&identities)?;
        *table = identities;
        tracing::info!(count = table.len(), capacity = self.capacity, "gallery loaded");
        Ok(table.len())
    }

    pub fn search(&self, probe: &Embedding, threshold: f32) -> Result<Option<MatchResult>, EngineError> {
        let _table = self.table.lock();
        self.engine.search(probe, threshold)
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Persist `identity` and rebuild.
    pub fn enroll(&self, identity: Identity) -> Result<(), GalleryError> {
        self.store.insert(&identity)?;
        tracing::info!(id = identity.id, name = %identity.name, "identity enrolled");
        self.rebuild()?;
        Ok(())
    }

    /// Delete identity `id` and its enrollment picture, then rebuild.
    /// Returns `false` when no such identity exists.
    pub fn remove(&self, id: u32) -> Result<bool, GalleryError> {
        let Some(name) = self.store.exists(id)? else {
            return Ok(false);
        };
        if !self.store.delete(id)? {
            return Ok(false);
        }
        let picture = Path::new(&name);
        if picture.is_file() {
            if let Err(e) = std::fs::remove_file(picture) {
                tracing::warn!(id, path = %picture.display(), error = %e, "failed to remove enrollment picture");
            }
        }
        tracing::info!(id, "identity removed");
        self.rebuild()?;
        Ok(true)
    }

    /// Drop the engine-side gallery.
    pub fn release(&self) {
        let mut table = self.table.lock();
        self.engine.release_gallery();
        table.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{one_hot, ScriptedEngine};
    use facegate_core::SqliteStore;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn setup(capacity: usize) -> (Arc<ScriptedEngine>, Arc<SqliteStore>, Gallery) {
        let engine = Arc::new(ScriptedEngine::new());
        let store = Arc::new(SqliteStore::open_in_memory(None).unwrap());
        let gallery = Gallery::new(engine.clone(), store.clone(), capacity);
        (engine, store, gallery)
    }

    fn identity(id: u32, key: u8) -> Identity {
        Identity {
            id,
            name: format!("user_{id}"),
            embedding: one_hot(key),
        }
    }

    #[test]
    fn test_enroll_makes_identity_searchable() {
        let (_engine, _store, gallery) = setup(10);
        assert!(gallery.search(&one_hot(3), 0.5).unwrap().is_none());
        gallery.enroll(identity(1, 3)).unwrap();
        let hit = gallery.search(&one_hot(3), 0.5).unwrap().unwrap();
        assert_eq!(hit.id, 1);
        assert_eq!(gallery.len(), 1);
    }

    #[test]
    fn test_rebuild_respects_capacity() {
        let (engine, store, gallery) = setup(2);
        for id in 1..=3 {
            store.insert(&identity(id, id as u8)).unwrap();
        }
        assert_eq!(gallery.rebuild().unwrap(), 2);
        assert!(gallery.is_full());
        assert_eq!(engine.gallery_len(), 2);
        assert!(gallery.search(&one_hot(3), 0.5).unwrap().is_none());
    }

    #[test]
    fn test_remove_deletes_picture() {
        let (_engine, store, gallery) = setup(10);
        let dir = std::env::temp_dir().join(format!("facegate-gallery-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let picture = dir.join("user_4.jpg");
        std::fs::write(&picture, b"jpeg").unwrap();

        gallery
            .enroll(Identity {
                id: 4,
                name: picture.to_string_lossy().into_owned(),
                embedding: one_hot(4),
            })
            .unwrap();
        assert!(gallery.remove(4).unwrap());
        assert!(!picture.exists());
        assert!(store.exists(4).unwrap().is_none());
        assert!(gallery.is_empty());
        assert!(!gallery.remove(4).unwrap());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_release_clears_engine_gallery() {
        let (engine, _store, gallery) = setup(10);
        gallery.enroll(identity(1, 1)).unwrap();
        gallery.release();
        assert_eq!(engine.gallery_len(), 0);
        assert_eq!(gallery.len(), 0);
    }

    /// Returns a snapshot taken before a delay on its first `load_all`.
    struct SlowFirstLoad {
        inner: SqliteStore,
        loading: AtomicBool,
        delayed: AtomicBool,
    }

    impl IdentityStore for SlowFirstLoad {
        fn next_id(&self) -> Result<u32, StoreError> {
            self.inner.next_id()
        }

        fn exists(&self, id: u32) -> Result<Option<String>, StoreError> {
            self.inner.exists(id)
        }

        fn insert(&self, identity: &Identity) -> Result<(), StoreError> {
            self.inner.insert(identity)
        }

        fn delete(&self, id: u32) -> Result<bool, StoreError> {
            self.inner.delete(id)
        }

        fn load_all(&self, capacity: usize) -> Result<Vec<Identity>, StoreError> {
            let snapshot = self.inner.load_all(capacity)?;
            if !self.delayed.swap(true, Ordering::SeqCst) {
                self.loading.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(200));
            }
            Ok(snapshot)
        }

        fn allow_list_dir(&self) -> Option<PathBuf> {
            None
        }
    }

    #[test]
    fn test_overlapping_rebuilds_keep_latest_enrollment() {
        let engine = Arc::new(ScriptedEngine::new());
        let store = Arc::new(SlowFirstLoad {
            inner: SqliteStore::open_in_memory(None).unwrap(),
            loading: AtomicBool::new(false),
            delayed: AtomicBool::new(false),
        });
        let gallery = Gallery::new(engine.clone(), store.clone(), 10);

        std::thread::scope(|scope| {
            let slow = scope.spawn(|| gallery.rebuild().unwrap());
            while !store.loading.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            gallery.enroll(identity(1, 3)).unwrap();
            slow.join().unwrap();
        });

        assert!(store.exists(1).unwrap().is_some());
        assert_eq!(gallery.len(), 1);
        assert_eq!(engine.gallery_len(), 1);
        assert_eq!(gallery.search(&one_hot(3), 0.5).unwrap().map(|m| m.id), Some(1));
    }
}
