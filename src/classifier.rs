use crate::error::SentimentError;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Label the classification pipelines use for the positive class
pub const POSITIVE_LABEL: i64 = 1;

/// A loaded binary text classifier.
///
/// Both methods take a batch and return one entry per input text, in order.
pub trait Classifier: Send + Sync {
    /// Predicted class label for each input
    fn predict(&self, texts: &[&str]) -> Result<Vec<i64>, SentimentError>;

    /// Probability distribution over the classes for each input
    fn predict_proba(&self, texts: &[&str]) -> Result<Vec<Vec<f64>>, SentimentError>;
}

/// Turns a local artifact copy into a ready classifier.
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Arc<dyn Classifier>, SentimentError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
}

impl Sentiment {
    /// Binary mapping: only label 1 is positive
    pub fn from_label(label: i64) -> Self {
        if label == POSITIVE_LABEL {
            Sentiment::Positive
        } else {
            Sentiment::Negative
        }
    }
}

/// Probability mass of the most likely class.
///
/// Empty distributions and maxima outside `[0, 1]` are inference errors.
pub fn confidence(distribution: &[f64]) -> Result<f64, SentimentError> {
    let max = distribution
        .iter()
        .copied()
        .fold(None, |acc: Option<f64>, p| match acc {
            Some(m) if m >= p => Some(m),
            _ => Some(p),
        })
        .ok_or_else(|| SentimentError::Inference("empty probability distribution".into()))?;

    if !max.is_finite() || !(0.0..=1.0).contains(&max) {
        return Err(SentimentError::Inference(format!(
            "probability out of range: {}",
            max
        )));
    }
    Ok(max)
}
