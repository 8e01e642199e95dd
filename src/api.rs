use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use uuid::Uuid;

use crate::config::Config;
use crate::describe::{DescribeError, Describer};
use crate::export;
use crate::flyer;
use crate::intake::{self, IntakeError};
use crate::models::{DraftEdit, DraftResponse, FlyerQuery, ShareResponse, UploadResponse};
use crate::session::{SessionError, SessionStore};

const INDEX_HTML: &str = include_str!("../static/index.html");
const UPLOAD_FIELD: &str = "image";
/// Room for multipart boundaries and headers on top of the image itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;
const INFERENCE_FAILED: &str =
    "We could not describe this photo right now. Please try again in a moment.";

// ── State ────────────────────────────────────────────────────────────────────

pub struct AppState {
    pub config: Config,
    pub describer: Describer,
    pub sessions: SessionStore,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: Config) -> Result<Self, DescribeError> {
        let describer = Describer::from_config(&config)?;
        let sessions = SessionStore::new(config.session_ttl);
        Ok(AppState {
            config,
            describer,
            sessions,
        })
    }
}

pub fn router(state: SharedState) -> Router {
    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD;
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", delete(delete_session))
        .route("/api/sessions/:id/analyze", post(analyze))
        .route("/api/sessions/:id/draft", get(get_draft).put(put_draft))
        .route("/api/sessions/:id/flyer.png", get(flyer_png))
        .route("/api/sessions/:id/share", get(share))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

// ── Error mapping ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Intake(IntakeError),
    Session(SessionError),
    Multipart(StatusCode, String),
    MissingField,
    Inference,
    Internal(String),
}

impl From<IntakeError> for ApiError {
    fn from(e: IntakeError) -> Self {
        ApiError::Intake(e)
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        ApiError::Session(e)
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::Multipart(e.status(), e.body_text())
    }
}

impl From<export::ExportError> for ApiError {
    fn from(e: export::ExportError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Intake(e) => {
                let status = match e {
                    IntakeError::Empty | IntakeError::Undecodable(_) => StatusCode::BAD_REQUEST,
                    IntakeError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                    IntakeError::UnsupportedType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                };
                (status, format!("{}. Please choose another photo.", e))
            }
            ApiError::Session(e) => {
                let status = match e {
                    SessionError::NotFound => StatusCode::NOT_FOUND,
                    SessionError::NoDraft => StatusCode::CONFLICT,
                    SessionError::Edit(_) => StatusCode::BAD_REQUEST,
                };
                (status, e.to_string())
            }
            ApiError::Multipart(status, msg) => (status, msg),
            ApiError::MissingField => (
                StatusCode::BAD_REQUEST,
                format!("Expected a file in the \"{}\" form field", UPLOAD_FIELD),
            ),
            ApiError::Inference => (StatusCode::BAD_GATEWAY, INFERENCE_FAILED.to_string()),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Something went wrong, please try again".to_string(),
                )
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::Session(SessionError::NotFound))
}

// ── Page + health ────────────────────────────────────────────────────────────

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "offline": state.describer.is_offline(),
        "sessions": state.sessions.len().await,
    }))
}

// ── Upload intake ────────────────────────────────────────────────────────────

async fn create_session(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let mut payload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(UPLOAD_FIELD) {
            let declared = field.content_type().map(str::to_string);
            let bytes = field.bytes().await?;
            payload = Some((bytes, declared));
            break;
        }
    }
    let (bytes, declared) = payload.ok_or(ApiError::MissingField)?;

    let max_bytes = state.config.max_upload_bytes;
    let upload = tokio::task::spawn_blocking(move || {
        intake::accept_upload(&bytes, declared.as_deref(), max_bytes)
    })
    .await?
    .map_err(|e| {
        tracing::info!(error = %e, "upload rejected");
        e
    })?;

    let (format, width, height) = (upload.format_name(), upload.width(), upload.height());
    let id = state.sessions.create(upload).await;
    tracing::info!(session = %id, format, width, height, "session opened");

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            session_id: id.to_string(),
            format: format.to_string(),
            width,
            height,
        }),
    ))
}

async fn delete_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    if state.sessions.remove(id).await {
        tracing::info!(session = %id, "session closed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(SessionError::NotFound.into())
    }
}

// ── Description ──────────────────────────────────────────────────────────────

async fn analyze(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<DraftResponse>, ApiError> {
    let id = parse_id(&id)?;
    let upload = state.sessions.upload(id).await?;

    match state
        .describer
        .describe(upload, &state.config.currency)
        .await
    {
        Ok(draft) => {
            let draft = state.sessions.set_draft(id, draft).await?;
            tracing::info!(session = %id, category = %draft.category, "draft created");
            Ok(Json(draft_response(id, draft)))
        }
        Err(e) => {
            tracing::warn!(session = %id, error = %e, "description failed");
            state.sessions.clear_draft(id).await?;
            Err(ApiError::Inference)
        }
    }
}

// ── Field editor ─────────────────────────────────────────────────────────────

async fn get_draft(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<DraftResponse>, ApiError> {
    let id = parse_id(&id)?;
    let draft = state.sessions.draft(id).await?;
    Ok(Json(draft_response(id, draft)))
}

async fn put_draft(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(edit): Json<DraftEdit>,
) -> Result<Json<DraftResponse>, ApiError> {
    let id = parse_id(&id)?;
    let draft = state.sessions.edit_draft(id, edit).await?;
    tracing::debug!(session = %id, revision = draft.revision, "draft edited");
    Ok(Json(draft_response(id, draft)))
}

fn draft_response(id: Uuid, draft: crate::models::ListingDraft) -> DraftResponse {
    DraftResponse {
        session_id: id.to_string(),
        flyer_url: format!("{}?v={}", flyer_path(id), draft.revision),
        draft,
    }
}

fn flyer_path(id: Uuid) -> String {
    format!("/api/sessions/{}/flyer.png", id)
}

// ── Flyer + export ───────────────────────────────────────────────────────────

async fn flyer_png(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<FlyerQuery>,
) -> Result<Response, ApiError> {
    let id = parse_id(&id)?;
    let input = state.sessions.render_input(id).await?;

    let png = match input.cached_png {
        Some(png) => png,
        None => {
            let revision = input.draft.revision;
            let upload = input.upload;
            let draft = input.draft;
            let png = tokio::task::spawn_blocking(move || {
                let flyer = flyer::compose(&upload.image, &draft);
                export::encode_png(&flyer)
            })
            .await??;
            let png = Arc::new(png);
            state.sessions.store_flyer(id, revision, png.clone()).await;
            tracing::info!(session = %id, revision, bytes = png.len(), "flyer rendered");
            png
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if query.download {
        if let Ok(value) = HeaderValue::from_str(&export::attachment_disposition()) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }
    Ok((StatusCode::OK, headers, png.as_ref().clone()).into_response())
}

async fn share(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ShareResponse>, ApiError> {
    let id = parse_id(&id)?;
    let draft = state.sessions.draft(id).await?;

    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let base = export::public_base(
        state.config.public_url.as_ref(),
        header_str("x-forwarded-proto"),
        header_str("host"),
    );
    let flyer_url = format!("{}{}", base, flyer_path(id));

    Ok(Json(ShareResponse {
        download_url: format!("{}?download=true", flyer_url),
        whatsapp_url: export::whatsapp_link(&draft, &flyer_url),
        flyer_url,
    }))
}
