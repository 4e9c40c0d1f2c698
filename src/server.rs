//! HTTP surface: multipart pre/post upload in, PNG overlay out.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use image::DynamicImage;
use serde::Serialize;
use serde_json::json;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::{
    config::ServeConfig,
    decode_image, encode_png,
    errors::{DamageSegError, Result},
    palette::DamageClass,
    DamageAnalyzer, DamageSegmentationModel,
};

pub const PRE_FIELD: &str = "pre_image";
pub const POST_FIELD: &str = "post_image";

pub struct AppState<M: DamageSegmentationModel> {
    analyzer: Arc<DamageAnalyzer<M>>,
}

impl<M: DamageSegmentationModel> Clone for AppState<M> {
    fn clone(&self) -> Self {
        Self {
            analyzer: Arc::clone(&self.analyzer),
        }
    }
}

/// JSON error body with the status chosen from the error kind.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<DamageSegError> for ApiError {
    fn from(err: DamageSegError) -> Self {
        if err.is_client_error() {
            warn!(error = %err, "rejected request");
            Self {
                status: StatusCode::BAD_REQUEST,
                message: err.to_string(),
            }
        } else {
            error!(error = ?err, "request failed");
            Self::internal(err.to_string())
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        warn!(error = %err, "malformed multipart body");
        Self {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        warn!(error = %rejection, "request is not multipart/form-data");
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ClassInfo {
    id: u8,
    class: DamageClass,
    name: &'static str,
    color: [u8; 3],
}

pub fn router<M>(analyzer: Arc<DamageAnalyzer<M>>, config: &ServeConfig) -> Result<Router>
where
    M: DamageSegmentationModel + 'static,
{
    let state = AppState { analyzer };

    Ok(Router::new()
        .route("/predict", post(predict::<M>))
        .route("/predict/", post(predict::<M>))
        .route("/analyze", post(analyze::<M>))
        .route("/analyze/", post(analyze::<M>))
        .route("/classes", get(classes))
        .route("/health", get(health::<M>))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors_layer(&config.cors_origins)?)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        let origins = origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin).map_err(|_| DamageSegError::Validation {
                    field: "cors_origin".to_string(),
                    reason: format!("{origin:?} is not a valid header value"),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any))
}

pub async fn serve<M>(analyzer: Arc<DamageAnalyzer<M>>, config: &ServeConfig) -> Result<()>
where
    M: DamageSegmentationModel + 'static,
{
    let app = router(analyzer, config)?;
    let addr = config.socket_addr();
    let listener =
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| DamageSegError::Configuration {
                message: format!("cannot bind {addr}: {e}"),
            })?;

    info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn read_pair(
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> std::result::Result<(Bytes, Bytes), ApiError> {
    let mut multipart = multipart?;
    let (mut pre, mut post) = (None, None);

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(PRE_FIELD) => pre = Some(field.bytes().await?),
            Some(POST_FIELD) => post = Some(field.bytes().await?),
            _ => {}
        }
    }

    let missing = |field: &str| DamageSegError::Upload {
        field: field.to_string(),
        reason: "is missing from the multipart form".to_string(),
    };
    let pre = pre.ok_or_else(|| missing(PRE_FIELD))?;
    let post = post.ok_or_else(|| missing(POST_FIELD))?;
    Ok((pre, post))
}

fn decode_pair(pre: &[u8], post: &[u8]) -> Result<(DynamicImage, DynamicImage)> {
    Ok((decode_image(pre, PRE_FIELD)?, decode_image(post, POST_FIELD)?))
}

/// Runs CPU-bound work off the async executor.
async fn run_blocking<T, F>(work: F) -> std::result::Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::internal(format!("inference task failed: {e}")))?
        .map_err(ApiError::from)
}

async fn predict<M>(
    State(state): State<AppState<M>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> std::result::Result<Response, ApiError>
where
    M: DamageSegmentationModel + 'static,
{
    let (pre, post) = read_pair(multipart).await?;
    let analyzer = Arc::clone(&state.analyzer);

    let png = run_blocking(move || {
        let (pre, post) = decode_pair(&pre, &post)?;
        let overlay = analyzer.overlay(&pre, &post)?;
        encode_png(&DynamicImage::ImageRgba8(overlay))
    })
    .await?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

async fn analyze<M>(
    State(state): State<AppState<M>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> std::result::Result<Response, ApiError>
where
    M: DamageSegmentationModel + 'static,
{
    let (pre, post) = read_pair(multipart).await?;
    let analyzer = Arc::clone(&state.analyzer);

    let analysis = run_blocking(move || {
        let (pre, post) = decode_pair(&pre, &post)?;
        analyzer.analyze(&pre, &post)
    })
    .await?;

    Ok(Json(analysis.summary).into_response())
}

async fn classes() -> Json<Vec<ClassInfo>> {
    Json(
        DamageClass::ALL
            .iter()
            .map(|&class| ClassInfo {
                id: class.id(),
                class,
                name: class.label(),
                color: class.color(),
            })
            .collect(),
    )
}

async fn health<M>(State(state): State<AppState<M>>) -> Json<serde_json::Value>
where
    M: DamageSegmentationModel + 'static,
{
    let model = state.analyzer.model();
    Json(json!({
        "status": "ok",
        "image_size": model.get_image_size(),
        "num_classes": model.num_classes(),
        "overlay_alpha": state.analyzer.overlay_alpha(),
    }))
}
