use crate::classifier::{Classifier, ModelLoader};
use crate::error::SentimentError;
use crate::storage::ArtifactStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Holds the loaded classifier for the lifetime of an execution context.
///
/// The in-memory handle and the local artifact copy move together: the copy
/// is removed whenever the handle is dropped, and re-downloaded before a new
/// handle is built. All state transitions happen under one async lock, so a
/// concurrent caller never sees a half-finished reload.
pub struct ModelCache {
    store: Arc<dyn ArtifactStore>,
    loader: Arc<dyn ModelLoader>,
    artifact_key: String,
    local_path: PathBuf,
    slot: Mutex<Option<Arc<dyn Classifier>>>,
}

impl ModelCache {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        loader: Arc<dyn ModelLoader>,
        artifact_key: impl Into<String>,
        local_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            loader,
            artifact_key: artifact_key.into(),
            local_path: local_path.into(),
            slot: Mutex::new(None),
        }
    }

    /// Returns a ready classifier.
    ///
    /// With `force_reload`, any cached handle and local copy are discarded
    /// first. Without it, a cached handle is returned with no I/O at all.
    /// On failure the cache is left empty and the next call retries.
    pub async fn obtain(&self, force_reload: bool) -> Result<Arc<dyn Classifier>, SentimentError> {
        let mut slot = self.slot.lock().await;

        if force_reload {
            *slot = None;
            self.remove_local_copy().await?;
        }

        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }

        let model = self.load().await?;
        *slot = Some(Arc::clone(&model));
        Ok(model)
    }

    /// Drops the cached classifier and its local copy.
    ///
    /// The next `obtain` downloads and deserializes the artifact again.
    pub async fn invalidate(&self) -> Result<(), SentimentError> {
        let mut slot = self.slot.lock().await;
        *slot = None;
        self.remove_local_copy().await
    }

    /// Whether a classifier is currently held in memory
    pub async fn is_loaded(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    async fn remove_local_copy(&self) -> Result<(), SentimentError> {
        let exists = tokio::fs::try_exists(&self.local_path)
            .await
            .map_err(|e| SentimentError::local_artifact(&self.local_path, e))?;
        if exists {
            debug!(path = %self.local_path.display(), "Removing cached model artifact");
            tokio::fs::remove_file(&self.local_path)
                .await
                .map_err(|e| SentimentError::local_artifact(&self.local_path, e))?;
        }
        Ok(())
    }

    async fn load(&self) -> Result<Arc<dyn Classifier>, SentimentError> {
        let started = Instant::now();

        if let Some(parent) = self.local_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SentimentError::local_artifact(parent, e))?;
            }
        }

        self.store
            .fetch(&self.artifact_key, &self.local_path)
            .await?;
        let model = self.loader.load(&self.local_path)?;

        info!(
            key = %self.artifact_key,
            path = %self.local_path.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Model loaded"
        );
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeLoader, FakeStore};

    fn cache_in(dir: &Path, store: &Arc<FakeStore>, loader: &Arc<FakeLoader>) -> ModelCache {
        ModelCache::new(
            store.clone(),
            loader.clone(),
            "sentiment_pipeline.onnx",
            dir.join("sentiment_pipeline.onnx"),
        )
    }

    #[tokio::test]
    async fn first_obtain_fetches_and_loads() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::with_artifact(b"model-v1"));
        let loader = Arc::new(FakeLoader::new(1, vec![0.1, 0.9]));
        let cache = cache_in(dir.path(), &store, &loader);

        assert!(!cache.is_loaded().await);
        cache.obtain(false).await.unwrap();

        assert!(cache.is_loaded().await);
        assert_eq!(store.fetches(), 1);
        assert_eq!(loader.loads(), 1);
        assert_eq!(std::fs::read(cache.local_path()).unwrap(), b"model-v1");
    }

    #[tokio::test]
    async fn warm_cache_does_no_io() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::with_artifact(b"model"));
        let loader = Arc::new(FakeLoader::new(1, vec![0.1, 0.9]));
        let cache = cache_in(dir.path(), &store, &loader);

        let first = cache.obtain(false).await.unwrap();
        for _ in 0..5 {
            let again = cache.obtain(false).await.unwrap();
            assert!(Arc::ptr_eq(&first, &again));
        }

        assert_eq!(store.fetches(), 1);
        assert_eq!(loader.loads(), 1);
    }

    #[tokio::test]
    async fn force_reload_replaces_handle_and_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::with_artifact(b"model-v1"));
        let loader = Arc::new(FakeLoader::new(1, vec![0.1, 0.9]));
        let cache = cache_in(dir.path(), &store, &loader);

        let first = cache.obtain(false).await.unwrap();
        store.set_artifact(b"model-v2");
        let second = cache.obtain(true).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(store.fetches(), 2);
        assert_eq!(loader.loads(), 2);
        assert_eq!(std::fs::read(cache.local_path()).unwrap(), b"model-v2");
    }

    #[tokio::test]
    async fn force_reload_without_local_copy_still_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::with_artifact(b"model"));
        let loader = Arc::new(FakeLoader::new(1, vec![0.1, 0.9]));
        let cache = cache_in(dir.path(), &store, &loader);

        cache.obtain(false).await.unwrap();
        std::fs::remove_file(cache.local_path()).unwrap();
        cache.obtain(true).await.unwrap();

        assert_eq!(store.fetches(), 2);
        assert_eq!(loader.loads(), 2);
    }

    #[tokio::test]
    async fn invalidate_removes_copy_and_next_obtain_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::with_artifact(b"model"));
        let loader = Arc::new(FakeLoader::new(1, vec![0.1, 0.9]));
        let cache = cache_in(dir.path(), &store, &loader);

        cache.obtain(false).await.unwrap();
        cache.invalidate().await.unwrap();

        assert!(!cache.is_loaded().await);
        assert!(!cache.local_path().exists());

        cache.obtain(false).await.unwrap();
        assert_eq!(store.fetches(), 2);
    }

    #[tokio::test]
    async fn invalidate_on_empty_cache_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::with_artifact(b"model"));
        let loader = Arc::new(FakeLoader::new(1, vec![0.1, 0.9]));
        let cache = cache_in(dir.path(), &store, &loader);

        cache.invalidate().await.unwrap();
        assert_eq!(store.fetches(), 0);
    }

    #[tokio::test]
    async fn fetch_failure_leaves_cache_empty_and_retries() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::failing("NoSuchKey"));
        let loader = Arc::new(FakeLoader::new(1, vec![0.1, 0.9]));
        let cache = cache_in(dir.path(), &store, &loader);

        let err = cache.obtain(false).await.err().unwrap();
        assert!(matches!(err, SentimentError::StorageFetch { .. }));
        assert!(!cache.is_loaded().await);
        assert_eq!(loader.loads(), 0);

        store.set_artifact(b"model");
        cache.obtain(false).await.unwrap();
        assert_eq!(store.fetches(), 2);
        assert_eq!(loader.loads(), 1);
    }

    #[tokio::test]
    async fn load_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::with_artifact(b"model"));
        let loader = Arc::new(FakeLoader::failing("unsupported pickle protocol"));
        let cache = cache_in(dir.path(), &store, &loader);

        let err = cache.obtain(false).await.err().unwrap();
        assert!(matches!(err, SentimentError::Deserialization { .. }));
        assert!(!cache.is_loaded().await);
    }

    #[tokio::test]
    async fn creates_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::with_artifact(b"model"));
        let loader = Arc::new(FakeLoader::new(1, vec![0.1, 0.9]));
        let cache = ModelCache::new(
            store.clone(),
            loader.clone(),
            "k",
            dir.path().join("nested/cache/model.onnx"),
        );

        cache.obtain(false).await.unwrap();
        assert!(cache.local_path().exists());
    }
}
