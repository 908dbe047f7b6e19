use crate::{
    app::{AddedFace, AppError, FaceService},
    encodings::FaceMatch,
};
use axum::{
    extract::{DefaultBodyLimit, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt::Debug, sync::Arc};
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    service: Arc<FaceService>,
}

async fn start_app(service: Arc<FaceService>, listen_addr: &str) {
    let shared_state = Arc::new(SharedState { service });

    async fn shutdown_signal() {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    let app = Router::new()
        .route("/", get(root))
        .route("/api/faces/add", post(add))
        .route("/api/faces/compare", post(compare))
        .route("/api/faces/total", get(total))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await.unwrap();
    log::info!("listening on {listen_addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();
}

pub fn start_daemon(service: Arc<FaceService>, listen_addr: &str) {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async { start_app(service, listen_addr).await });
}

// Wrapper so axum can turn `AppError` into a response.
#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        match self.0 {
            AppError::EmptyCorpus => (
                axum::http::StatusCode::NOT_FOUND,
                json!({"error": self.0.to_string()}).to_string(),
            ),
            AppError::NoFaceDetected => (
                axum::http::StatusCode::BAD_REQUEST,
                json!({"error": self.0.to_string()}).to_string(),
            ),
            AppError::Base64(_) => {
                log::error!("{self:?}");
                (
                    axum::http::StatusCode::BAD_REQUEST,
                    json!({"error": self.0.to_string()}).to_string(),
                )
            }
            AppError::Encoder(_)
            | AppError::Storage(_)
            | AppError::Rank(_)
            | AppError::IO(_)
            | AppError::Other(_) => {
                log::error!("{self:?}");
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": self.0.to_string()}).to_string(),
                )
            }
        }
        .into_response()
    }
}

// This enables using `?` on functions that return `Result<_, AppError>` to
// turn them into `Result<_, HttpError>` without manual mapping.
impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

async fn root() -> axum::Json<serde_json::Value> {
    json!({"message": "face matching service is running"}).into()
}

#[derive(Deserialize, Serialize)]
pub struct AddFaceRequest {
    /// Label the encoding is stored under, usually the image file name
    pub label: String,
    pub image_b64: String,
}

impl Debug for AddFaceRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AddFaceRequest {{ label: {:?}, image_b64: [REDUCTED] }}",
            self.label
        )
    }
}

async fn add(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<AddFaceRequest>,
) -> Result<axum::Json<AddedFace>, HttpError> {
    log::debug!("payload: {payload:?}");

    let service = state.service.clone();

    tokio::task::block_in_place(move || {
        let image = STANDARD.decode(payload.image_b64)?;
        let added = service.add_face(&payload.label, &image)?;
        Ok(added.into())
    })
}

#[derive(Deserialize, Serialize)]
pub struct CompareFacesRequest {
    pub image_b64: String,

    /// Override the configured number of matches to return
    pub top_k: Option<usize>,
}

impl Debug for CompareFacesRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CompareFacesRequest {{ image_b64: [REDUCTED], top_k: {:?} }}",
            self.top_k
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareFacesResponse {
    pub matches: Vec<FaceMatch>,
}

async fn compare(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<CompareFacesRequest>,
) -> Result<axum::Json<CompareFacesResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    let service = state.service.clone();

    tokio::task::block_in_place(move || {
        let image = STANDARD.decode(payload.image_b64)?;
        let matches = service.compare(&image, payload.top_k)?;
        Ok(CompareFacesResponse { matches }.into())
    })
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TotalResponse {
    pub total: usize,
}

async fn total(
    State(state): State<Arc<SharedState>>,
) -> Result<axum::Json<TotalResponse>, HttpError> {
    let service = state.service.clone();

    tokio::task::block_in_place(move || {
        service
            .total()
            .map(|total| TotalResponse { total }.into())
            .map_err(Into::into)
    })
}
