use crate::classifier::{confidence, Sentiment};
use crate::error::SentimentError;
use crate::model_cache::ModelCache;
use lambda_http::http::Method;
use lambda_http::request::RequestContext;
use lambda_http::{Body, Error, Request, RequestExt, Response};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

/// State shared by every invocation in one execution context
pub struct AppState {
    pub cache: ModelCache,
    /// Maximum review length in characters
    pub max_review_chars: usize,
    /// Path that forces a model reload, if enabled
    pub reload_route: Option<String>,
}

/// Response payload for a classified review
#[derive(Serialize)]
struct SentimentResponse {
    sentiment: Sentiment,
    /// Probability of the predicted class
    confidence: f64,
}

#[derive(Serialize)]
struct ReloadResponse {
    reloaded: bool,
}

/// Error response payload
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Lambda handler function.
///
/// Receives an HTTP request with a JSON body, classifies the review and
/// returns the sentiment as a JSON response. Requests on the reload route
/// replace the cached model instead.
pub async fn function_handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let request_id = event
        .lambda_context_ref()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();
    let span = info_span!("invocation", request_id = %request_id);

    async move {
        if is_reload_request(&state, &event) {
            return reload(&state).await;
        }

        match classify(&state, event.body()).await {
            Ok(response) => {
                info!(
                    sentiment = ?response.sentiment,
                    confidence = response.confidence,
                    "Review classified"
                );
                json_response(200, &response)
            }
            Err(e) => Ok(error_from_sentiment_error(&e)),
        }
    }
    .instrument(span)
    .await
}

fn is_reload_request(state: &AppState, event: &Request) -> bool {
    let Some(route) = &state.reload_route else {
        return false;
    };
    if event.method() != Method::POST {
        return false;
    }
    let path = event.uri().path();
    let path = match request_stage(event) {
        Some(stage) => strip_stage(path, &stage),
        None => path,
    };
    path.trim_end_matches('/') == route.trim_end_matches('/')
}

/// API Gateway stage name, which lambda_http prepends to the request path
fn request_stage(event: &Request) -> Option<String> {
    match event.request_context_ref()? {
        RequestContext::ApiGatewayV1(ctx) => ctx.stage.clone(),
        RequestContext::ApiGatewayV2(ctx) => ctx.stage.clone(),
        _ => None,
    }
}

fn strip_stage<'a>(path: &'a str, stage: &str) -> &'a str {
    match path.strip_prefix('/').and_then(|p| p.strip_prefix(stage)) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => path,
    }
}

async fn reload(state: &AppState) -> Result<Response<Body>, Error> {
    let was_loaded = state.cache.is_loaded().await;
    info!(was_loaded, "Model reload requested");
    match state.cache.obtain(true).await {
        Ok(_) => {
            info!("Model reloaded");
            json_response(200, &ReloadResponse { reloaded: true })
        }
        Err(e) => Ok(error_from_sentiment_error(&e)),
    }
}

async fn classify(state: &AppState, body: &Body) -> Result<SentimentResponse, SentimentError> {
    let review = parse_review(body, state.max_review_chars)?;

    let model = state.cache.obtain(false).await?;
    let inputs = [review.as_str()];
    let label = model
        .predict(&inputs)?
        .first()
        .copied()
        .ok_or_else(|| SentimentError::Inference("model returned no label".into()))?;
    let distribution = model
        .predict_proba(&inputs)?
        .into_iter()
        .next()
        .ok_or_else(|| SentimentError::Inference("model returned no probabilities".into()))?;

    Ok(SentimentResponse {
        sentiment: Sentiment::from_label(label),
        confidence: confidence(&distribution)?,
    })
}

/// Extracts a non-empty review from the request body.
///
/// A missing body is treated as `{}`.
fn parse_review(body: &[u8], max_chars: usize) -> Result<String, SentimentError> {
    let raw: &[u8] = if body.is_empty() { b"{}" } else { body };
    let malformed = |e: serde_json::Error| {
        warn!("Malformed request body: {}", e);
        SentimentError::MalformedInput(e)
    };

    // The body must be a JSON object; arrays, strings and null are malformed.
    let mut request: Map<String, Value> = serde_json::from_slice(raw).map_err(malformed)?;
    let review: Option<String> =
        serde_json::from_value(request.remove("review").unwrap_or(Value::Null)).map_err(malformed)?;

    let review = match review {
        Some(review) if !review.is_empty() => review,
        _ => {
            warn!("Request without review");
            return Err(SentimentError::MissingReview);
        }
    };

    let chars = review.chars().count();
    if chars > max_chars {
        warn!("Review too long: {} chars", chars);
        return Err(SentimentError::ReviewTooLong {
            got: chars,
            max: max_chars,
        });
    }

    Ok(review)
}

fn json_response<T: Serialize>(status: u16, payload: &T) -> Result<Response<Body>, Error> {
    let response_json = serde_json::to_string(payload)?;

    let resp = Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(response_json.into())
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;

    Ok(resp)
}

/// Helper function to create error responses from SentimentError
fn error_from_sentiment_error(err: &SentimentError) -> Response<Body> {
    let status = err.status_code();
    if status >= 500 {
        error!("Request failed: {}", err);
    }

    error_response(status, &err.user_message())
}

/// Helper function to create error responses
fn error_response(status: u16, message: &str) -> Response<Body> {
    let body = serde_json::to_string(&ErrorResponse {
        error: message.to_string(),
    })
    .unwrap_or_else(|_| r#"{"error":"Unknown error"}"#.to_string());

    // Only a header/status bug can make the builder fail; fall back to a
    // bare 500 without headers.
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap_or_else(|e| {
            error!("Failed to build error response: {}", e);
            let mut fallback = Response::new(Body::from(r#"{"error":"Internal server error"}"#));
            *fallback.status_mut() = lambda_http::http::StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
}
