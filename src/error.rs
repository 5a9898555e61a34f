use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while serving a sentiment request
#[derive(Error, Debug)]
pub enum SentimentError {
    /// The `review` field is absent, null or empty
    #[error("Missing 'review' field")]
    MissingReview,

    /// Review text exceeds the configured character limit
    #[error("Review exceeds maximum length of {max} characters (got {got})")]
    ReviewTooLong {
        got: usize,
        max: usize,
    },

    /// Request body is not valid JSON for the expected shape
    #[error("Invalid JSON: {0}")]
    MalformedInput(#[from] serde_json::Error),

    /// The model artifact could not be fetched from object storage
    #[error("Failed to fetch s3://{bucket}/{key}: {reason}")]
    StorageFetch {
        bucket: String,
        key: String,
        reason: String,
    },

    /// Reading, writing or removing the local artifact copy failed
    #[error("Local artifact error at {}: {source}", path.display())]
    LocalArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The artifact could not be turned into a classifier
    #[error("Failed to load model from {}: {reason}", path.display())]
    Deserialization {
        path: PathBuf,
        reason: String,
    },

    /// The classifier failed or returned an unusable result
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Rejected configuration at cold start
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

impl SentimentError {
    pub(crate) fn local_artifact(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SentimentError::LocalArtifact {
            path: path.into(),
            source,
        }
    }

    /// Returns true if this error should be reported as a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SentimentError::MissingReview
                | SentimentError::ReviewTooLong { .. }
                | SentimentError::MalformedInput(_)
        )
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        if self.is_client_error() {
            400
        } else {
            500
        }
    }

    /// Message placed in the `error` field of the response body
    pub fn user_message(&self) -> String {
        match self {
            SentimentError::ReviewTooLong { got, max } => {
                format!("Review is too long: {} characters (max: {})", got, max)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_400() {
        assert_eq!(SentimentError::MissingReview.status_code(), 400);
        assert_eq!(SentimentError::ReviewTooLong { got: 10, max: 5 }.status_code(), 400);

        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert_eq!(SentimentError::MalformedInput(parse).status_code(), 400);
    }

    #[test]
    fn server_errors_map_to_500() {
        let fetch = SentimentError::StorageFetch {
            bucket: "b".into(),
            key: "k".into(),
            reason: "NoSuchKey".into(),
        };
        assert_eq!(fetch.status_code(), 500);
        assert_eq!(SentimentError::Inference("boom".into()).status_code(), 500);
        assert_eq!(
            SentimentError::Deserialization {
                path: "/tmp/model".into(),
                reason: "truncated".into(),
            }
            .status_code(),
            500
        );
    }

    #[test]
    fn missing_review_message_is_stable() {
        assert_eq!(
            SentimentError::MissingReview.user_message(),
            "Missing 'review' field"
        );
    }

    #[test]
    fn storage_fetch_message_is_display() {
        let err = SentimentError::StorageFetch {
            bucket: "models".into(),
            key: "pipeline.onnx".into(),
            reason: "access denied".into(),
        };
        assert_eq!(err.user_message(), err.to_string());
        assert_eq!(
            err.to_string(),
            "Failed to fetch s3://models/pipeline.onnx: access denied"
        );
    }
}
