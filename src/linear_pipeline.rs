//! Bag-of-words sentiment pipeline: TF-IDF features feeding a binary
//! logistic regression, serialized as a single JSON document.
//!
//! ```json
//! {
//!   "vocabulary": {"great": 0, "terrible": 1},
//!   "idf": [1.4, 1.9],
//!   "coefficients": [2.1, -2.6],
//!   "intercept": 0.05,
//!   "classes": [0, 1]
//! }
//! ```

use crate::classifier::{Classifier, ModelLoader};
use crate::error::SentimentError;
use ndarray::Array1;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Tokens shorter than this are dropped
const MIN_TOKEN_CHARS: usize = 2;

#[derive(Debug, Deserialize)]
struct LinearArtifact {
    vocabulary: HashMap<String, usize>,
    #[serde(default)]
    idf: Option<Vec<f64>>,
    coefficients: Vec<f64>,
    intercept: f64,
    #[serde(default = "default_classes")]
    classes: [i64; 2],
    #[serde(default = "default_lowercase")]
    lowercase: bool,
    #[serde(default)]
    sublinear_tf: bool,
}

fn default_classes() -> [i64; 2] {
    [0, 1]
}

fn default_lowercase() -> bool {
    true
}

/// Why a serialized linear pipeline was rejected
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("pipeline has no coefficients")]
    NoCoefficients,

    #[error("vocabulary term {term:?} maps to column {column} but there are {features} coefficients")]
    ColumnOutOfRange {
        term: String,
        column: usize,
        features: usize,
    },

    #[error("idf has {got} entries but there are {features} coefficients")]
    IdfLength {
        got: usize,
        features: usize,
    },
}

/// TF-IDF + logistic regression classifier.
#[derive(Debug)]
pub struct LinearPipeline {
    vocabulary: HashMap<String, usize>,
    idf: Array1<f64>,
    coefficients: Array1<f64>,
    intercept: f64,
    classes: [i64; 2],
    lowercase: bool,
    sublinear_tf: bool,
}

impl LinearPipeline {
    /// Parses and validates a serialized pipeline.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PipelineError> {
        let artifact: LinearArtifact = serde_json::from_slice(bytes)?;
        let features = artifact.coefficients.len();

        if features == 0 {
            return Err(PipelineError::NoCoefficients);
        }
        if let Some((term, &column)) = artifact.vocabulary.iter().find(|&(_, &c)| c >= features) {
            return Err(PipelineError::ColumnOutOfRange {
                term: term.clone(),
                column,
                features,
            });
        }
        let idf = match artifact.idf {
            Some(idf) if idf.len() != features => {
                return Err(PipelineError::IdfLength {
                    got: idf.len(),
                    features,
                });
            }
            Some(idf) => Array1::from(idf),
            None => Array1::ones(features),
        };

        Ok(Self {
            vocabulary: artifact.vocabulary,
            idf,
            coefficients: Array1::from(artifact.coefficients),
            intercept: artifact.intercept,
            classes: artifact.classes,
            lowercase: artifact.lowercase,
            sublinear_tf: artifact.sublinear_tf,
        })
    }

    fn tokens<'a>(&self, text: &'a str) -> impl Iterator<Item = &'a str> {
        text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
    }

    /// L2-normalized TF-IDF vector for one document.
    fn features(&self, text: &str) -> Array1<f64> {
        let mut tf = Array1::<f64>::zeros(self.coefficients.len());
        for token in self.tokens(text) {
            let column = if self.lowercase {
                self.vocabulary.get(&token.to_lowercase())
            } else {
                self.vocabulary.get(token)
            };
            if let Some(&column) = column {
                tf[column] += 1.0;
            }
        }

        if self.sublinear_tf {
            tf.mapv_inplace(|c| if c > 0.0 { 1.0 + c.ln() } else { 0.0 });
        }

        let weighted = tf * &self.idf;
        let norm = weighted.dot(&weighted).sqrt();
        if norm > 0.0 {
            weighted / norm
        } else {
            weighted
        }
    }

    fn decision(&self, text: &str) -> f64 {
        self.features(text).dot(&self.coefficients) + self.intercept
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl Classifier for LinearPipeline {
    fn predict(&self, texts: &[&str]) -> Result<Vec<i64>, SentimentError> {
        Ok(texts
            .iter()
            .map(|text| {
                if self.decision(text) > 0.0 {
                    self.classes[1]
                } else {
                    self.classes[0]
                }
            })
            .collect())
    }

    fn predict_proba(&self, texts: &[&str]) -> Result<Vec<Vec<f64>>, SentimentError> {
        Ok(texts
            .iter()
            .map(|text| {
                let p = sigmoid(self.decision(text));
                vec![1.0 - p, p]
            })
            .collect())
    }
}

/// Loads JSON linear pipelines from disk.
#[derive(Debug, Default)]
pub struct LinearLoader;

impl ModelLoader for LinearLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn Classifier>, SentimentError> {
        let bytes = std::fs::read(path).map_err(|e| SentimentError::local_artifact(path, e))?;
        let pipeline = LinearPipeline::from_slice(&bytes).map_err(|e| {
            SentimentError::Deserialization {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        debug!(terms = pipeline.vocabulary.len(), "Linear pipeline loaded");
        Ok(Arc::new(pipeline))
    }
}
