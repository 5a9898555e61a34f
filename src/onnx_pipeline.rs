use crate::classifier::{Classifier, ModelLoader};
use crate::error::SentimentError;
use ndarray::{ArrayView1, ArrayView2};
use ort::{session::Session, value::Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokenizers::{Tokenizer, TruncationParams};
use tracing::warn;

/// Sentiment classifier backed by ONNX Runtime.
///
/// Wraps a sequence-classification model (e.g. a DistilBERT fine-tuned on
/// SST-2) whose single output is the logits tensor `[batch, num_labels]`.
/// Label indices are the class labels: index 1 is the positive class.
pub struct OnnxPipeline {
    // ONNX Runtime Rust bindings need &mut for session.run()
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

impl OnnxPipeline {
    /// Creates a new pipeline.
    ///
    /// # Arguments
    /// * `model_path` - Path to the downloaded ONNX model
    /// * `tokenizer_path` - Path to the tokenizer JSON shipped with the function
    /// * `max_sequence_length` - Encodings, special tokens included, are truncated to this length
    pub fn new(
        model_path: &Path,
        tokenizer_path: &Path,
        max_sequence_length: usize,
    ) -> Result<Self, SentimentError> {
        let session = build_session(model_path).map_err(|e| SentimentError::Deserialization {
            path: model_path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let tokenizer = load_tokenizer(tokenizer_path, max_sequence_length)?;

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }

    /// Runs the model on one text and returns the class distribution.
    fn classify_one(&self, text: &str) -> Result<Vec<f64>, SentimentError> {
        let (input_ids, attention_mask) = encode(&self.tokenizer, text)?;
        let shape = vec![1, input_ids.len()];
        let ort_err = |e: ort::Error| SentimentError::Inference(e.to_string());

        let mut session = match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Mutex was poisoned, recovering...");
                poisoned.into_inner()
            }
        };

        let outputs = session
            .run(ort::inputs![
                "input_ids" => Value::from_array((shape.clone(), input_ids)).map_err(ort_err)?,
                "attention_mask" => Value::from_array((shape, attention_mask)).map_err(ort_err)?,
            ])
            .map_err(ort_err)?;

        // logits: [batch_size=1, num_labels]
        let (output_shape, output_data) = outputs[0].try_extract_tensor::<f32>().map_err(ort_err)?;
        if output_shape.len() != 2 {
            return Err(SentimentError::Inference(format!(
                "expected logits of rank 2, got rank {}",
                output_shape.len()
            )));
        }
        let rows = output_shape[0] as usize;
        let num_labels = output_shape[1] as usize;

        let logits = ArrayView2::from_shape((rows, num_labels), output_data)
            .map_err(|e| SentimentError::Inference(e.to_string()))?;
        if rows == 0 || num_labels == 0 {
            return Err(SentimentError::Inference("model returned no logits".into()));
        }

        Ok(softmax(logits.row(0)))
    }
}

impl Classifier for OnnxPipeline {
    fn predict(&self, texts: &[&str]) -> Result<Vec<i64>, SentimentError> {
        Ok(self
            .predict_proba(texts)?
            .iter()
            .map(|dist| argmax(dist) as i64)
            .collect())
    }

    fn predict_proba(&self, texts: &[&str]) -> Result<Vec<Vec<f64>>, SentimentError> {
        texts.iter().map(|text| self.classify_one(text)).collect()
    }
}

/// Loads the tokenizer with truncation enabled.
///
/// The tokenizer truncates the text before its post-processor adds the
/// special tokens, so `[CLS] ... [SEP]` survives on long reviews.
fn load_tokenizer(path: &Path, max_sequence_length: usize) -> Result<Tokenizer, SentimentError> {
    let deserialization = |reason: String| SentimentError::Deserialization {
        path: path.to_path_buf(),
        reason,
    };

    let mut tokenizer = Tokenizer::from_file(path).map_err(|e| deserialization(e.to_string()))?;
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: max_sequence_length,
            ..Default::default()
        }))
        .map_err(|e| deserialization(e.to_string()))?;

    Ok(tokenizer)
}

fn encode(tokenizer: &Tokenizer, text: &str) -> Result<(Vec<i64>, Vec<i64>), SentimentError> {
    let encoding = tokenizer
        .encode(text, true)
        .map_err(|e| SentimentError::Inference(format!("tokenization failed: {}", e)))?;

    // Convert to i64 as required by ONNX Runtime
    let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
    let attention_mask: Vec<i64> = encoding
        .get_attention_mask()
        .iter()
        .map(|&m| m as i64)
        .collect();

    Ok((input_ids, attention_mask))
}

fn build_session(model_path: &Path) -> ort::Result<Session> {
    // Level1 graph optimizations, single intra-op thread: a Lambda sandbox
    // has roughly one vCPU at typical memory sizes.
    let session = Session::builder()?
        .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level1)?
        .with_intra_threads(1)?
        .commit_from_file(model_path)?;
    Ok(session)
}

/// Numerically stable softmax over one row of logits.
fn softmax(logits: ArrayView1<f32>) -> Vec<f64> {
    let max = logits.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
    let exps = logits.mapv(|x| f64::from(x - max).exp());
    let sum = exps.sum();
    exps.iter().map(|e| e / sum).collect()
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, best_value), (i, &v)| {
            if v > best_value {
                (i, v)
            } else {
                (best, best_value)
            }
        })
        .0
}

/// Loads downloaded ONNX models, pairing them with the packaged tokenizer.
pub struct OnnxLoader {
    tokenizer_path: PathBuf,
    max_sequence_length: usize,
}

impl OnnxLoader {
    pub fn new(tokenizer_path: impl Into<PathBuf>, max_sequence_length: usize) -> Self {
        Self {
            tokenizer_path: tokenizer_path.into(),
            max_sequence_length,
        }
    }
}

impl ModelLoader for OnnxLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn Classifier>, SentimentError> {
        let pipeline = OnnxPipeline::new(path, &self.tokenizer_path, self.max_sequence_length)?;
        Ok(Arc::new(pipeline))
    }
}
