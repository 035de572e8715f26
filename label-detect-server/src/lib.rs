use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use label_detect::{
    generate_insert_script, select_attribute, AnalysisRecord, AnalyzerConfig, FaceAnalyzer,
    FaceDetector, ImageAnalyzerHelper, ImageReference, LabelDetector, ObjectStore,
    RekognitionDetector, S3ObjectStore, StorageConfig, PRESIGNED_URL_EXPIRY,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

/// Largest upload accepted; Rekognition reads bucket images up to 15MB
pub const MAX_IMAGE_BYTES: usize = 15 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Analysis(#[from] label_detect::Error),
    #[error("Server error: {0}")]
    ServerError(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        use label_detect::Error;

        let status = match &self {
            ServerError::Analysis(
                Error::InvalidReference(_)
                | Error::InvalidRecord(_)
                | Error::Configuration(_)
                | Error::UnknownAttribute(_),
            ) => StatusCode::BAD_REQUEST,
            ServerError::Analysis(Error::ObjectNotFound { .. }) => StatusCode::NOT_FOUND,
            ServerError::Analysis(Error::Service(_)) => StatusCode::BAD_GATEWAY,
            ServerError::Analysis(Error::ServiceUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Analysis(_) | ServerError::ServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AnalysisRequest {
    /// Image reference in `authority//object` form
    pub image: String,
    pub max_labels: Option<u32>,
    pub min_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FaceRequest {
    /// Image reference in `authority//object` form
    pub image: String,
    /// Face attribute to return instead of whole faces
    pub attribute: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UploadResponse {
    pub url: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ExistsResponse {
    pub exists: bool,
}

/// Shared server state.
///
/// Local image references are refused unless a storage folder is
/// configured, in which case only images inside it are read.
#[derive(Clone)]
pub struct AppState {
    detector: Arc<dyn LabelDetector>,
    faces: Arc<dyn FaceDetector>,
    store: Arc<dyn ObjectStore>,
    config: AnalyzerConfig,
    storage: Option<StorageConfig>,
}

impl AppState {
    pub fn new<D>(detector: Arc<D>, store: Arc<dyn ObjectStore>, config: AnalyzerConfig) -> Self
    where
        D: LabelDetector + FaceDetector + 'static,
    {
        Self {
            detector: detector.clone(),
            faces: detector,
            store,
            config,
            storage: None,
        }
    }

    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Parse a client reference, keeping local reads inside the storage folder
    async fn admit(&self, image: &str) -> Result<ImageReference, ServerError> {
        let reference: ImageReference = image.parse()?;
        if reference.is_remote() {
            return Ok(reference);
        }

        match &self.storage {
            Some(storage) => Ok(reference.confine_to(&storage.storage_folder).await?),
            None => Err(label_detect::Error::InvalidReference(format!(
                "{} is a local image; this server only accepts bucket references",
                reference
            ))
            .into()),
        }
    }

    /// State backed by Rekognition and S3
    pub async fn from_aws(config: AnalyzerConfig, path_style: bool) -> Self {
        let sdk_config = config.load_sdk_config().await;
        let store = if path_style {
            S3ObjectStore::with_path_style(&sdk_config)
        } else {
            S3ObjectStore::new(&sdk_config)
        };

        Self::new(
            Arc::new(RekognitionDetector::new(&sdk_config)),
            Arc::new(store),
            config,
        )
    }
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::permissive();

    Router::new()
        .route("/health", get(health_check))
        .route("/api/request_analysis", post(request_analysis))
        .route("/api/detect_faces", post(detect_faces))
        .route("/api/upload/:bucket/*object", post(upload))
        .route("/api/download/:bucket/*object", get(download))
        .route("/api/exists/:bucket/*object", get(exists))
        .route("/api/delete/:bucket/*object", delete(remove))
        .route("/api/generate/sql", post(generate_sql))
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(app: Router, addr: SocketAddr) -> Result<(), ServerError> {
    info!("Starting label detection server on {}", addr);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    serve(listener, app).await
}

/// Serve on an already bound listener
pub async fn serve(listener: TcpListener, app: Router) -> Result<(), ServerError> {
    axum::serve(listener, app)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn request_analysis(
    State(state): State<AppState>,
    Json(payload): Json<AnalysisRequest>,
) -> Result<Response, ServerError> {
    let reference = state.admit(&payload.image).await?;

    let mut config = state.config.clone();
    if let Some(max_labels) = payload.max_labels {
        config = config.with_max_labels(max_labels)?;
    }
    if let Some(min_confidence) = payload.min_confidence {
        config = config.with_min_confidence(min_confidence)?;
    }

    let mut helper = ImageAnalyzerHelper::new(state.detector.clone(), config);
    helper.request_analysis(&reference).await?;
    let body = helper.to_json()?;

    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

async fn detect_faces(
    State(state): State<AppState>,
    Json(payload): Json<FaceRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let reference = state.admit(&payload.image).await?;
    let faces = FaceAnalyzer::new(state.faces.clone())
        .detect(&reference)
        .await?;

    let body = match payload.attribute {
        Some(attribute) => serde_json::to_value(select_attribute(&faces, &attribute)?),
        None => serde_json::to_value(&faces),
    }
    .map_err(label_detect::Error::from)?;

    Ok(Json(body))
}

async fn upload(
    State(state): State<AppState>,
    Path((bucket, object)): Path<(String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadResponse>), ServerError> {
    state.store.put_object(&bucket, &object, body.to_vec()).await?;
    let url = state
        .store
        .presigned_url(&bucket, &object, PRESIGNED_URL_EXPIRY)
        .await?;

    info!("Uploaded {}/{}", bucket, object);
    Ok((StatusCode::CREATED, Json(UploadResponse { url })))
}

async fn download(
    State(state): State<AppState>,
    Path((bucket, object)): Path<(String, String)>,
) -> Result<Response, ServerError> {
    let body = state.store.get_object(&bucket, &object).await?;

    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], body).into_response())
}

async fn exists(
    State(state): State<AppState>,
    Path((bucket, object)): Path<(String, String)>,
) -> Result<Json<ExistsResponse>, ServerError> {
    let exists = state.store.object_exists(&bucket, &object).await?;
    Ok(Json(ExistsResponse { exists }))
}

async fn remove(
    State(state): State<AppState>,
    Path((bucket, object)): Path<(String, String)>,
) -> Result<StatusCode, ServerError> {
    state.store.delete_object(&bucket, &object).await?;
    info!("Deleted {}/{}", bucket, object);
    Ok(StatusCode::NO_CONTENT)
}

async fn generate_sql(Json(record): Json<AnalysisRecord>) -> Result<Response, ServerError> {
    let script = generate_insert_script(&record)?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], script).into_response())
}
