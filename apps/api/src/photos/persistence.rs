use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::photo::{EnrichmentStatus, PhotoRecord};
use crate::photos::display::DisplayRegistry;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Stored photo {id} is unreadable: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Durable storage for photos and notes.
///
/// The display reference is session state: it is never written, and
/// `load_all_photos` hands back records carrying freshly issued references.
#[async_trait]
pub trait PhotoRepository: Send + Sync {
    /// Overwrites any stored row with the same id.
    async fn persist_photo(&self, record: &PhotoRecord) -> Result<(), PersistenceError>;

    /// Deletes the photo and its note as one unit. Unknown ids succeed.
    async fn delete_photo(&self, id: &str) -> Result<(), PersistenceError>;

    async fn load_all_photos(&self) -> Result<Vec<PhotoRecord>, PersistenceError>;

    async fn persist_note(&self, photo_id: &str, text: &str) -> Result<(), PersistenceError>;

    async fn load_all_notes(&self) -> Result<HashMap<String, String>, PersistenceError>;

    async fn clear_all(&self) -> Result<(), PersistenceError>;
}

#[derive(Debug, FromRow)]
struct PhotoRow {
    id: String,
    file_name: String,
    mime_type: String,
    raw_binary: Vec<u8>,
    capture_date: String,
    location_name: String,
    country: Option<String>,
    latitude: f64,
    longitude: f64,
    description: String,
    status: String,
    manually_placed: bool,
    last_modified: i64,
    uploaded_at: i64,
}

/// SQLite-backed [`PhotoRepository`].
pub struct SqlitePhotoRepository {
    pool: SqlitePool,
    displays: Arc<DisplayRegistry>,
}

impl SqlitePhotoRepository {
    pub fn new(pool: SqlitePool, displays: Arc<DisplayRegistry>) -> Self {
        Self { pool, displays }
    }
}

#[async_trait]
impl PhotoRepository for SqlitePhotoRepository {
    async fn persist_photo(&self, record: &PhotoRecord) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO photos
                (id, file_name, mime_type, raw_binary, capture_date, location_name, country,
                 latitude, longitude, description, status, manually_placed, last_modified,
                 uploaded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(id) DO UPDATE SET
                file_name = excluded.file_name,
                mime_type = excluded.mime_type,
                raw_binary = excluded.raw_binary,
                capture_date = excluded.capture_date,
                location_name = excluded.location_name,
                country = excluded.country,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                description = excluded.description,
                status = excluded.status,
                manually_placed = excluded.manually_placed,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(&record.id)
        .bind(&record.file_name)
        .bind(&record.mime_type)
        .bind(record.raw_binary.as_ref())
        .bind(&record.capture_date)
        .bind(&record.location_name)
        .bind(&record.country)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(&record.description)
        .bind(record.status.as_str())
        .bind(record.manually_placed)
        .bind(record.last_modified)
        .bind(record.uploaded_at)
        .execute(&self.pool)
        .await?;

        debug!(photo_id = %record.id, status = record.status.as_str(), "Persisted photo");
        Ok(())
    }

    async fn delete_photo(&self, id: &str) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM notes WHERE photo_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM photos WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(photo_id = %id, "Deleted photo and note");
        Ok(())
    }

    async fn load_all_photos(&self) -> Result<Vec<PhotoRecord>, PersistenceError> {
        let rows = sqlx::query_as::<_, PhotoRow>(
            "SELECT * FROM photos ORDER BY uploaded_at ASC, rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let status: EnrichmentStatus =
                row.status.parse().map_err(|reason| PersistenceError::Corrupt {
                    id: row.id.clone(),
                    reason,
                })?;
            let raw_binary = Bytes::from(row.raw_binary);
            let display = self.displays.register(raw_binary.clone(), &row.mime_type).await;

            records.push(PhotoRecord {
                id: row.id,
                file_name: row.file_name,
                mime_type: row.mime_type,
                raw_binary,
                display_reference: Some(display),
                capture_date: row.capture_date,
                location_name: row.location_name,
                country: row.country,
                latitude: row.latitude,
                longitude: row.longitude,
                description: row.description,
                status,
                manually_placed: row.manually_placed,
                last_modified: row.last_modified,
                uploaded_at: row.uploaded_at,
            });
        }

        info!("Loaded {} photos from local store", records.len());
        Ok(records)
    }

    async fn persist_note(&self, photo_id: &str, text: &str) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO notes (photo_id, body, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(photo_id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
            "#,
        )
        .bind(photo_id)
        .bind(text)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_all_notes(&self) -> Result<HashMap<String, String>, PersistenceError> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT photo_id, body FROM notes")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn clear_all(&self) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM notes").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM photos").execute(&mut *tx).await?;
        tx.commit().await?;
        info!("Cleared local photo store");
        Ok(())
    }
}
