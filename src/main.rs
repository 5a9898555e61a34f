pub mod classifier;
pub mod error;
pub mod http_handler;
pub mod linear_pipeline;
pub mod model_cache;
pub mod onnx_pipeline;
pub mod settings;
pub mod storage;

#[cfg(test)]
mod testing;

use classifier::ModelLoader;
use http_handler::{function_handler, AppState};
use lambda_http::{run, service_fn, tracing, Error};
use linear_pipeline::LinearLoader;
use model_cache::ModelCache;
use onnx_pipeline::OnnxLoader;
use settings::{ModelFormat, Settings};
use std::sync::Arc;
use storage::S3Store;

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize tracing for CloudWatch logs
    tracing::init_default_subscriber();

    let settings = Settings::from_env().map_err(|e| {
        tracing::error!("Invalid configuration: {}", e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync>
    })?;
    tracing::info!(
        bucket = %settings.model_bucket,
        key = %settings.model_key,
        format = ?settings.model_format,
        "Starting sentiment function"
    );

    let loader: Arc<dyn ModelLoader> = match settings.model_format {
        ModelFormat::Onnx => {
            // The ONNX Runtime environment must exist before any session is
            // created and stays alive for the whole process.
            ort::init().with_name("sentiment-lambda").commit()?;
            Arc::new(OnnxLoader::new(
                settings.tokenizer_path.clone(),
                settings.max_sequence_length,
            ))
        }
        ModelFormat::Linear => Arc::new(LinearLoader),
    };

    let store = Arc::new(S3Store::new(
        settings.model_bucket.clone(),
        settings.aws_region.as_deref(),
    )?);

    let cache = ModelCache::new(
        store,
        loader,
        settings.model_key.clone(),
        settings.artifact_path(),
    );

    // Load the model once during cold start; every invocation in this
    // execution context reuses it.
    cache.obtain(false).await.map_err(|e| {
        tracing::error!("Failed to load model: {}", e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync>
    })?;
    tracing::info!(path = %cache.local_path().display(), "Model ready");

    let state = Arc::new(AppState {
        cache,
        max_review_chars: settings.max_review_chars,
        reload_route: settings.reload_route.clone(),
    });

    // Start the Lambda runtime.
    // Each incoming request will clone the Arc and call function_handler.
    run(service_fn(move |event| {
        let state = state.clone();
        function_handler(state, event)
    }))
    .await
}
