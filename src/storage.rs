use crate::error::SentimentError;
use async_trait::async_trait;
use rusoto_core::Region;
use rusoto_s3::{GetObjectRequest, S3Client, S3};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info};

/// Remote object storage holding the model artifact.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Downloads `key` to `dest`, replacing any file already there.
    async fn fetch(&self, key: &str, dest: &Path) -> Result<(), SentimentError>;
}

/// S3-backed artifact store for a single bucket.
pub struct S3Store {
    client: S3Client,
    bucket: String,
}

impl S3Store {
    /// Creates a store for `bucket`.
    ///
    /// With no explicit region the default provider chain applies
    /// (`AWS_DEFAULT_REGION` / `AWS_REGION`, both set inside Lambda).
    pub fn new(bucket: impl Into<String>, region: Option<&str>) -> Result<Self, SentimentError> {
        let region = match region {
            Some(name) => Region::from_str(name).map_err(|e| {
                SentimentError::InvalidSettings(format!("unknown AWS region {}: {}", name, e))
            })?,
            None => Region::default(),
        };

        Ok(Self {
            client: S3Client::new(region),
            bucket: bucket.into(),
        })
    }

    fn fetch_error(&self, key: &str, reason: impl ToString) -> SentimentError {
        SentimentError::StorageFetch {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl ArtifactStore for S3Store {
    async fn fetch(&self, key: &str, dest: &Path) -> Result<(), SentimentError> {
        info!(bucket = %self.bucket, key, dest = %dest.display(), "Downloading model artifact");

        let request = GetObjectRequest {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            ..Default::default()
        };

        let output = self
            .client
            .get_object(request)
            .await
            .map_err(|e| self.fetch_error(key, e))?;

        let body = output
            .body
            .ok_or_else(|| self.fetch_error(key, "object has no body"))?;

        let mut reader = Box::pin(body.into_async_read());
        let written = write_artifact(&mut reader, dest, |e| self.fetch_error(key, e)).await?;

        debug!(bytes = written, "Model artifact written");
        Ok(())
    }
}

/// Streams `reader` into `dest`.
///
/// Bytes go to a sibling `.part` file that is renamed over `dest` once
/// complete; on any failure the partial file is removed. Read failures are
/// reported through `read_error`.
async fn write_artifact<R, F>(reader: &mut R, dest: &Path, read_error: F) -> Result<u64, SentimentError>
where
    R: AsyncRead + Unpin + ?Sized,
    F: FnOnce(std::io::Error) -> SentimentError,
{
    let partial = partial_path(dest);
    let result = persist(reader, &partial, dest, read_error).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&partial).await;
    }
    result
}

async fn persist<R, F>(
    reader: &mut R,
    partial: &Path,
    dest: &Path,
    read_error: F,
) -> Result<u64, SentimentError>
where
    R: AsyncRead + Unpin + ?Sized,
    F: FnOnce(std::io::Error) -> SentimentError,
{
    let mut file = tokio::fs::File::create(partial)
        .await
        .map_err(|e| SentimentError::local_artifact(partial, e))?;

    let written = tokio::io::copy(reader, &mut file).await.map_err(read_error)?;
    file.flush()
        .await
        .map_err(|e| SentimentError::local_artifact(partial, e))?;
    drop(file);

    tokio::fs::rename(partial, dest)
        .await
        .map_err(|e| SentimentError::local_artifact(dest, e))?;

    Ok(written)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}
