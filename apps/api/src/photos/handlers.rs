//! Axum route handlers for the Photo API.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::photo::{PhotoRecord, PhotoView};
use crate::photos::calendar::{group_by_date, select_day, DateRange};
use crate::photos::clustering::{cluster_members, overview, ClusterOverview};
use crate::photos::dating::is_date_string;
use crate::photos::enrichment::{PhotoUpload, SubmitOutcome};
use crate::state::AppState;

const REVISION_WAIT: Duration = Duration::from_secs(25);

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LocationUpdate {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct NoteResponse {
    pub photo_id: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct MemberResult {
    pub photo_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<PhotoView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClusterRelocationResponse {
    pub key: String,
    pub results: Vec<MemberResult>,
}

#[derive(Debug, Serialize)]
pub struct CalendarResponse {
    pub total: usize,
    pub days: BTreeMap<String, usize>,
}

#[derive(Debug, Deserialize)]
pub struct RevisionQuery {
    pub after: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct RevisionResponse {
    pub revision: u64,
}

fn views<'a>(
    records: impl IntoIterator<Item = &'a PhotoRecord>,
    notes: &HashMap<String, String>,
) -> Vec<PhotoView> {
    records
        .into_iter()
        .map(|record| PhotoView::new(record, notes.get(&record.id).cloned()))
        .collect()
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("Photo {id} not found"))
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/photos
///
/// Multipart fields: `file` (required, an image) and `last_modified`
/// (optional, Unix milliseconds; defaults to now). Returns 201 with the
/// provisional record, or 200 with the existing record for a duplicate.
pub async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<PhotoView>), AppError> {
    let mut file: Option<(String, Option<String>, bytes::Bytes)> = None;
    let mut last_modified: Option<i64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .filter(|n| !n.trim().is_empty())
                    .ok_or_else(|| AppError::Validation("file part has no file name".into()))?;
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Read error: {e}")))?;
                file = Some((file_name, content_type, bytes));
            }
            Some("last_modified") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Read error: {e}")))?;
                let parsed = raw.trim().parse::<i64>().map_err(|_| {
                    AppError::Validation(format!(
                        "last_modified must be Unix milliseconds, got '{raw}'"
                    ))
                })?;
                last_modified = Some(parsed);
            }
            _ => {}
        }
    }

    let (file_name, content_type, bytes) =
        file.ok_or_else(|| AppError::Validation("Missing file in multipart form".into()))?;
    let mime_type = image_mime_type(&file_name, content_type.as_deref())?;

    let upload = PhotoUpload {
        file_name,
        mime_type,
        bytes,
        last_modified_ms: last_modified.unwrap_or_else(|| Utc::now().timestamp_millis()),
    };

    let outcome = state.pipeline.submit(upload).await?;
    let status = match outcome {
        SubmitOutcome::Created(_) => StatusCode::CREATED,
        SubmitOutcome::Duplicate(_) => StatusCode::OK,
    };
    let record = outcome.record();
    let note = state.store.note(&record.id).await;
    Ok((status, Json(PhotoView::new(record, note))))
}

/// Declared content type when it is an image, else a guess from the extension.
fn image_mime_type(file_name: &str, declared: Option<&str>) -> Result<String, AppError> {
    if let Some(declared) = declared.filter(|m| m.starts_with("image/")) {
        return Ok(declared.to_string());
    }
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    let guessed = match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "tif" | "tiff" => "image/tiff",
        _ => {
            return Err(AppError::Validation(format!(
                "'{file_name}' is not an image"
            )))
        }
    };
    Ok(guessed.to_string())
}

/// GET /api/v1/photos?start=&end=
pub async fn handle_list_photos(
    State(state): State<AppState>,
    Query(range): Query<DateRange>,
) -> Result<Json<Vec<PhotoView>>, AppError> {
    range.validate()?;
    let records = state.store.all().await;
    let notes = state.store.notes().await;
    Ok(Json(views(range.apply(&records), &notes)))
}

/// GET /api/v1/photos/:id
pub async fn handle_get_photo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PhotoView>, AppError> {
    let record = state.store.find_by_id(&id).await.ok_or_else(|| not_found(&id))?;
    let note = state.store.note(&id).await;
    Ok(Json(PhotoView::new(&record, note)))
}

/// DELETE /api/v1/photos/:id
///
/// Idempotent: deleting an unknown id is a no-op.
pub async fn handle_delete_photo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if !state.pipeline.delete(&id).await? {
        debug!(photo_id = %id, "Delete requested for unknown photo");
    }
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /api/v1/photos/:id/location
///
/// Returns the optimistic record; the place name follows asynchronously.
pub async fn handle_update_location(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<LocationUpdate>,
) -> Result<Json<PhotoView>, AppError> {
    let record = state
        .pipeline
        .relocate(&id, request.latitude, request.longitude)
        .await?;
    let note = state.store.note(&id).await;
    Ok(Json(PhotoView::new(&record, note)))
}

/// PUT /api/v1/photos/:id/note
pub async fn handle_put_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<NoteRequest>,
) -> Result<Json<NoteResponse>, AppError> {
    state.pipeline.set_note(&id, &request.text).await?;
    Ok(Json(NoteResponse {
        photo_id: id,
        text: request.text,
    }))
}

/// GET /api/v1/photos/:id/note
///
/// A photo without a note has the empty note.
pub async fn handle_get_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<NoteResponse>, AppError> {
    if !state.store.contains(&id).await {
        return Err(not_found(&id));
    }
    let text = state.store.note(&id).await.unwrap_or_default();
    Ok(Json(NoteResponse { photo_id: id, text }))
}

/// GET /api/v1/clusters
pub async fn handle_clusters(State(state): State<AppState>) -> Json<ClusterOverview> {
    let records = state.store.all().await;
    Json(overview(&records))
}

/// POST /api/v1/clusters/:key/relocate
///
/// Moves every photo currently in the cluster. Members are resolved at call
/// time and relocated independently; the response reports each one.
pub async fn handle_relocate_cluster(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<LocationUpdate>,
) -> Result<Json<ClusterRelocationResponse>, AppError> {
    let records = state.store.all().await;
    let members = cluster_members(&records, &key);
    if members.is_empty() {
        return Err(AppError::NotFound(format!("Cluster {key} not found")));
    }

    info!(cluster = %key, members = members.len(), "Relocating cluster");
    let outcomes = state
        .pipeline
        .relocate_many(&members, request.latitude, request.longitude)
        .await;

    let results = outcomes
        .into_iter()
        .map(|outcome| match outcome.result {
            Ok(record) => MemberResult {
                photo_id: outcome.photo_id,
                ok: true,
                photo: Some(PhotoView::from(&record)),
                error: None,
            },
            Err(e) => MemberResult {
                photo_id: outcome.photo_id,
                ok: false,
                photo: None,
                error: Some(e.to_string()),
            },
        })
        .collect();

    Ok(Json(ClusterRelocationResponse { key, results }))
}

/// GET /api/v1/calendar?start=&end=
pub async fn handle_calendar(
    State(state): State<AppState>,
    Query(range): Query<DateRange>,
) -> Result<Json<CalendarResponse>, AppError> {
    range.validate()?;
    let records = state.store.all().await;
    let in_range = range.apply(&records);
    Ok(Json(CalendarResponse {
        total: in_range.len(),
        days: group_by_date(in_range),
    }))
}

/// GET /api/v1/days/:date
pub async fn handle_day(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<Vec<PhotoView>>, AppError> {
    if !is_date_string(&date) {
        return Err(AppError::Validation(format!(
            "'{date}' is not a YYYY-MM-DD date"
        )));
    }
    let records = state.store.all().await;
    let notes = state.store.notes().await;
    Ok(Json(views(select_day(&records, &date), &notes)))
}

/// GET /api/v1/display/:token
pub async fn handle_display(
    State(state): State<AppState>,
    Path(token): Path<Uuid>,
) -> Result<Response, AppError> {
    let blob = state
        .displays
        .resolve(token)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Display {token} not found")))?;

    Ok((
        [
            (header::CONTENT_TYPE, blob.mime_type),
            (header::CACHE_CONTROL, "private, max-age=3600".to_string()),
        ],
        Body::from(blob.bytes),
    )
        .into_response())
}

/// DELETE /api/v1/photos
///
/// Wipes every photo and note.
pub async fn handle_reset(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.pipeline.reset().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/revision?after=N
///
/// Long-poll: with `after`, waits until the store moves past that revision or
/// the wait times out, then returns the current revision.
pub async fn handle_revision(
    State(state): State<AppState>,
    Query(query): Query<RevisionQuery>,
) -> Json<RevisionResponse> {
    let mut revisions = state.store.subscribe();
    let changed = match query.after {
        Some(after) => {
            match tokio::time::timeout(REVISION_WAIT, revisions.wait_for(|r| *r > after)).await {
                Ok(Ok(revision)) => Some(*revision),
                _ => None,
            }
        }
        None => None,
    };
    let revision = changed.unwrap_or_else(|| *revisions.borrow());
    Json(RevisionResponse { revision })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_image_type_wins() {
        assert_eq!(
            image_mime_type("x.bin", Some("image/png")).unwrap(),
            "image/png"
        );
    }

    #[test]
    fn test_mime_guessed_from_extension() {
        assert_eq!(
            image_mime_type("IMG_0001.JPG", Some("application/octet-stream")).unwrap(),
            "image/jpeg"
        );
        assert_eq!(image_mime_type("scan.heic", None).unwrap(), "image/heic");
        assert!(matches!(
            image_mime_type("notes.txt", Some("text/plain")),
            Err(AppError::Validation(_))
        ));
        assert!(image_mime_type("no_extension", None).is_err());
    }
}
