//! In-memory collaborators with call counters, shared by the unit tests.

use crate::classifier::{Classifier, ModelLoader};
use crate::error::SentimentError;
use crate::storage::ArtifactStore;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) struct FakeStore {
    artifact: Mutex<Result<Vec<u8>, String>>,
    fetches: AtomicUsize,
}

impl FakeStore {
    pub(crate) fn with_artifact(bytes: &[u8]) -> Self {
        Self {
            artifact: Mutex::new(Ok(bytes.to_vec())),
            fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing(reason: &str) -> Self {
        Self {
            artifact: Mutex::new(Err(reason.to_string())),
            fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_artifact(&self, bytes: &[u8]) {
        *self.artifact.lock().unwrap() = Ok(bytes.to_vec());
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for FakeStore {
    async fn fetch(&self, key: &str, dest: &Path) -> Result<(), SentimentError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let artifact = self.artifact.lock().unwrap().clone();
        match artifact {
            Ok(bytes) => tokio::fs::write(dest, bytes)
                .await
                .map_err(|e| SentimentError::local_artifact(dest, e)),
            Err(reason) => Err(SentimentError::StorageFetch {
                bucket: "test-bucket".to_string(),
                key: key.to_string(),
                reason,
            }),
        }
    }
}

/// Classifier returning a fixed label and distribution for every input.
pub(crate) struct FakeClassifier {
    label: i64,
    distribution: Vec<f64>,
    predictions: Arc<AtomicUsize>,
}

impl Classifier for FakeClassifier {
    fn predict(&self, texts: &[&str]) -> Result<Vec<i64>, SentimentError> {
        self.predictions.fetch_add(1, Ordering::SeqCst);
        Ok(vec![self.label; texts.len()])
    }

    fn predict_proba(&self, texts: &[&str]) -> Result<Vec<Vec<f64>>, SentimentError> {
        Ok(vec![self.distribution.clone(); texts.len()])
    }
}

pub(crate) struct FakeLoader {
    outcome: Result<(i64, Vec<f64>), String>,
    loads: AtomicUsize,
    predictions: Arc<AtomicUsize>,
}

impl FakeLoader {
    pub(crate) fn new(label: i64, distribution: Vec<f64>) -> Self {
        Self {
            outcome: Ok((label, distribution)),
            loads: AtomicUsize::new(0),
            predictions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn failing(reason: &str) -> Self {
        Self {
            outcome: Err(reason.to_string()),
            loads: AtomicUsize::new(0),
            predictions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of `predict` calls across every classifier this loader built
    pub(crate) fn predictions(&self) -> usize {
        self.predictions.load(Ordering::SeqCst)
    }
}

impl ModelLoader for FakeLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn Classifier>, SentimentError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        std::fs::read(path).map_err(|e| SentimentError::local_artifact(path, e))?;

        match &self.outcome {
            Ok((label, distribution)) => Ok(Arc::new(FakeClassifier {
                label: *label,
                distribution: distribution.clone(),
                predictions: Arc::clone(&self.predictions),
            })),
            Err(reason) => Err(SentimentError::Deserialization {
                path: path.to_path_buf(),
                reason: reason.clone(),
            }),
        }
    }
}
