//! Image ingest and serving handlers.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use picvault_core::DeleteScope;
use picvault_metadata::ImageRecord;
use serde::{Deserialize, Serialize};

/// Response header naming the tier that served an image.
pub const CACHE_TIER_HEADER: &str = "x-cache-tier";

/// Request body for base64 ingest.
#[derive(Debug, Deserialize)]
pub struct CreateImageRequest {
    /// Base64 image, optionally as a `data:<mime>;base64,` URL.
    pub b64_json: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// An image record plus the URL it is served at.
#[derive(Debug, Serialize)]
pub struct ImageResponse {
    #[serde(flatten)]
    pub record: ImageRecord,
    pub url: String,
}

impl ImageResponse {
    fn new(state: &AppState, record: ImageRecord) -> Self {
        let url = state.image_url(&record.id);
        Self { record, url }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub scope: Option<String>,
}

/// POST /v1/images - Store a base64 image under a new id.
#[tracing::instrument(skip(state, request))]
pub async fn create_image(
    State(state): State<AppState>,
    Json(request): Json<CreateImageRequest>,
) -> ApiResult<(StatusCode, Json<ImageResponse>)> {
    let record = state
        .cache
        .put_base64(&request.b64_json, request.content_type.as_deref())
        .await?;
    tracing::info!(image_id = %record.id, bytes = record.size_bytes, "Image created");
    Ok((StatusCode::CREATED, Json(ImageResponse::new(&state, record))))
}

/// PUT /v1/images/{id} - Store raw image bytes under a caller-chosen id.
#[tracing::instrument(skip(state, headers, body), fields(image_id = %id))]
pub async fn put_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<ImageResponse>)> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .map(|v| {
            v.to_str()
                .map_err(|_| ApiError::BadRequest("Content-Type is not valid ASCII".to_string()))
        })
        .transpose()?
        .unwrap_or_default();

    let record = state.cache.put(&id, body, content_type).await?;
    tracing::info!(bytes = record.size_bytes, "Image stored");
    Ok((StatusCode::CREATED, Json(ImageResponse::new(&state, record))))
}

/// GET /images/{id} - Serve image bytes.
pub async fn serve_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let image = state.cache.get(&id).await?;
    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, image.content_type),
            (CONTENT_LENGTH, image.bytes.len().to_string()),
            // An id always names the same bytes.
            (CACHE_CONTROL, "public, max-age=31536000, immutable".to_string()),
            (
                axum::http::HeaderName::from_static(CACHE_TIER_HEADER),
                image.tier.as_str().to_string(),
            ),
        ],
        image.bytes,
    )
        .into_response())
}

/// GET /v1/images/{id} - Get an image's record.
pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ImageResponse>> {
    let record = state.cache.record(&id).await?;
    Ok(Json(ImageResponse::new(&state, record)))
}

/// DELETE /v1/images/{id}?scope=local|remote|all - Delete tiers of an image.
#[tracing::instrument(skip(state, query), fields(image_id = %id))]
pub async fn delete_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<StatusCode> {
    let scope = match query.scope.as_deref() {
        Some(scope) => scope
            .parse::<DeleteScope>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => DeleteScope::default(),
    };
    state.cache.delete(&id, scope).await?;
    Ok(StatusCode::NO_CONTENT)
}
