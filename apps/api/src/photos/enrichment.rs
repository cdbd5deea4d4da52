//! Asynchronous enrichment pipeline.
//!
//! Each photo gets its own task per inference call. Tasks never touch the store;
//! they send their result over a channel to a single applier task that merges
//! it under the photo's lock and then persists. Every mutation (upload,
//! relocation, inference result, deletion) therefore goes through the same
//! "lock id, merge, persist" path.
//!
//! Ordering rules for results that race each other:
//! - a result for a photo that is no longer in the store is dropped;
//! - once a photo has been placed by hand, the initial analysis only
//!   contributes date and description;
//! - a relocation result applies only while the photo still sits at the
//!   coordinates that relocation asked about.
//!
//! A library-wide `RwLock<()>` sits above the per-photo locks. Every
//! "merge, persist" sequence holds it for read; reset holds it for write, so a
//! wipe never interleaves with a write that would put a row back on disk.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::errors::AppError;
use crate::inference::{InferenceError, InferenceService, PhotoAnalysis};
use crate::models::photo::{photo_id, EnrichmentStatus, PhotoPatch, PhotoRecord};
use crate::photos::dating::{provisional_capture_date, resolve_capture_date};
use crate::photos::display::DisplayRegistry;
use crate::photos::persistence::PhotoRepository;
use crate::photos::store::PhotoStore;

pub const LOCATION_ANALYZING: &str = "Analyzing...";
pub const LOCATION_ANALYSIS_FAILED: &str = "Analysis failed";
pub const LOCATION_RESOLVING: &str = "Identifying location...";
pub const LOCATION_UNIDENTIFIED: &str = "Unknown location";

/// A file accepted from the user.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
    /// File-system last-modified time, Unix milliseconds.
    pub last_modified_ms: i64,
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Created(PhotoRecord),
    /// The identical file was already in the library; nothing changed.
    Duplicate(PhotoRecord),
}

impl SubmitOutcome {
    pub fn record(&self) -> &PhotoRecord {
        match self {
            SubmitOutcome::Created(record) | SubmitOutcome::Duplicate(record) => record,
        }
    }
}

/// Outcome of one member of a cluster relocation.
#[derive(Debug)]
pub struct MemberRelocation {
    pub photo_id: String,
    pub result: Result<PhotoRecord, AppError>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RestoreSummary {
    pub photos: usize,
    pub notes: usize,
    pub resumed: usize,
}

enum PipelineEvent {
    EnrichmentStarted {
        id: String,
    },
    EnrichmentFinished {
        id: String,
        result: Result<PhotoAnalysis, InferenceError>,
    },
    RelocationFinished {
        id: String,
        latitude: f64,
        longitude: f64,
        result: Result<String, InferenceError>,
    },
}

/// State shared by the pipeline handle and the applier task.
struct Shared {
    store: Arc<PhotoStore>,
    repo: Arc<dyn PhotoRepository>,
    in_flight: watch::Sender<usize>,
    /// Read: any mutation of a single photo. Write: reset.
    library: RwLock<()>,
}

#[derive(Clone)]
pub struct EnrichmentPipeline {
    shared: Arc<Shared>,
    displays: Arc<DisplayRegistry>,
    inference: Arc<dyn InferenceService>,
    events: mpsc::UnboundedSender<PipelineEvent>,
}

impl EnrichmentPipeline {
    /// Builds the pipeline and spawns its applier task. Must run inside a Tokio runtime.
    pub fn start(
        store: Arc<PhotoStore>,
        repo: Arc<dyn PhotoRepository>,
        displays: Arc<DisplayRegistry>,
        inference: Arc<dyn InferenceService>,
    ) -> Self {
        let (events, receiver) = mpsc::unbounded_channel();
        let (in_flight, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            store,
            repo,
            in_flight,
            library: RwLock::new(()),
        });
        tokio::spawn(run_applier(Arc::clone(&shared), receiver));

        Self {
            shared,
            displays,
            inference,
            events,
        }
    }

    /// Accepts a file: the provisional record is visible and persisted before this
    /// returns, and analysis continues in the background.
    pub async fn submit(&self, upload: PhotoUpload) -> Result<SubmitOutcome, AppError> {
        if upload.bytes.is_empty() {
            return Err(AppError::Validation(format!(
                "File '{}' is empty",
                upload.file_name
            )));
        }

        let id = photo_id(&upload.file_name, upload.bytes.len(), upload.last_modified_ms);
        let _library = self.shared.library.read().await;
        let guard = self.shared.store.lock_id(&id).await;

        if let Some(existing) = self.shared.store.find_by_id(&id).await {
            info!(photo_id = %id, "Photo already in library; skipping duplicate upload");
            return Ok(SubmitOutcome::Duplicate(existing));
        }

        let display = self
            .displays
            .register(upload.bytes.clone(), &upload.mime_type)
            .await;
        let record = PhotoRecord {
            id: id.clone(),
            capture_date: provisional_capture_date(&upload.file_name, upload.last_modified_ms),
            file_name: upload.file_name,
            mime_type: upload.mime_type,
            raw_binary: upload.bytes,
            display_reference: Some(display),
            location_name: LOCATION_ANALYZING.to_string(),
            country: None,
            latitude: 0.0,
            longitude: 0.0,
            description: String::new(),
            status: EnrichmentStatus::Provisional,
            manually_placed: false,
            last_modified: upload.last_modified_ms,
            uploaded_at: Utc::now().timestamp_millis(),
        };

        let record = self.shared.store.upsert(record).await;
        let persisted = self.shared.repo.persist_photo(&record).await;
        drop(guard);

        self.spawn_enrichment(&record);
        info!(photo_id = %id, capture_date = %record.capture_date, "Accepted photo");

        if let Err(e) = persisted {
            error!(photo_id = %id, "Photo accepted but not persisted: {e}");
            return Err(e.into());
        }
        Ok(SubmitOutcome::Created(record))
    }

    /// Moves a photo by hand. The new coordinates and a placeholder name are
    /// visible before this returns; the place name is resolved in the background.
    ///
    /// Requires the photo's original bytes, since the naming call looks at the image.
    pub async fn relocate(
        &self,
        id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<PhotoRecord, AppError> {
        validate_coordinates(latitude, longitude)?;

        let _library = self.shared.library.read().await;
        let guard = self.shared.store.lock_id(id).await;
        let current = self
            .shared
            .store
            .find_by_id(id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Photo {id} not found")))?;

        if !current.has_image_data() {
            return Err(AppError::Validation(format!(
                "Photo {id} has no image data; its location name cannot be resolved"
            )));
        }

        let updated = self
            .shared
            .store
            .merge(id, relocation_patch(latitude, longitude))
            .await
            .ok_or_else(|| AppError::NotFound(format!("Photo {id} not found")))?;
        let persisted = self.shared.repo.persist_photo(&updated).await;
        drop(guard);

        self.spawn_relocation(&updated, latitude, longitude);
        info!(photo_id = %id, latitude, longitude, "Photo placed manually");

        persisted?;
        Ok(updated)
    }

    /// Relocates every listed photo independently. One member failing neither
    /// blocks nor rolls back the others.
    pub async fn relocate_many(
        &self,
        ids: &[String],
        latitude: f64,
        longitude: f64,
    ) -> Vec<MemberRelocation> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.relocate(id, latitude, longitude).await;
            if let Err(e) = &result {
                warn!(photo_id = %id, "Cluster member relocation failed: {e}");
            }
            results.push(MemberRelocation {
                photo_id: id.clone(),
                result,
            });
        }
        results
    }

    /// Deletes a photo and its note. The durable delete happens first: when it
    /// fails the in-memory record stays and the error is returned.
    /// Returns whether a photo was actually removed.
    pub async fn delete(&self, id: &str) -> Result<bool, AppError> {
        let _library = self.shared.library.read().await;
        let _guard = self.shared.store.lock_id(id).await;

        self.shared.repo.delete_photo(id).await?;
        let removed = self.shared.store.remove_by_id(id).await;

        if let Some(display) = removed.as_ref().and_then(|r| r.display_reference) {
            self.displays.revoke(display).await;
        }
        if removed.is_some() {
            info!(photo_id = %id, "Deleted photo");
        }
        Ok(removed.is_some())
    }

    pub async fn set_note(&self, id: &str, text: &str) -> Result<(), AppError> {
        let _library = self.shared.library.read().await;
        let _guard = self.shared.store.lock_id(id).await;
        if !self.shared.store.contains(id).await {
            return Err(AppError::NotFound(format!("Photo {id} not found")));
        }
        self.shared.store.set_note(id, text).await;
        self.shared.repo.persist_note(id, text).await?;
        Ok(())
    }

    /// Loads the durable store into memory and resumes any photo that was
    /// still waiting on the inference service when the last session ended.
    pub async fn restore(&self) -> Result<RestoreSummary, AppError> {
        let _library = self.shared.library.read().await;
        let photos = self.shared.repo.load_all_photos().await?;
        let notes = self.shared.repo.load_all_notes().await?;

        let mut summary = RestoreSummary {
            photos: photos.len(),
            notes: notes.len(),
            resumed: 0,
        };

        for record in photos {
            let record = self.shared.store.upsert(record).await;
            match record.status {
                EnrichmentStatus::Provisional | EnrichmentStatus::Enriching => {
                    self.spawn_enrichment(&record);
                    summary.resumed += 1;
                }
                EnrichmentStatus::Relocating => {
                    self.spawn_relocation(&record, record.latitude, record.longitude);
                    summary.resumed += 1;
                }
                _ => {}
            }
        }
        for (photo_id, text) in notes {
            self.shared.store.set_note(&photo_id, &text).await;
        }

        info!(
            photos = summary.photos,
            notes = summary.notes,
            resumed = summary.resumed,
            "Restored library"
        );
        Ok(summary)
    }

    /// Wipes durable and in-memory state. Waits for any write already under way;
    /// results still in flight are dropped on arrival.
    pub async fn reset(&self) -> Result<(), AppError> {
        let _library = self.shared.library.write().await;
        self.shared.repo.clear_all().await?;
        self.shared.store.clear().await;
        self.displays.clear().await;
        info!("Library reset");
        Ok(())
    }

    /// Number of inference calls whose result has not been applied yet.
    pub fn in_flight(&self) -> usize {
        *self.shared.in_flight.borrow()
    }

    /// Resolves once every pending inference result has been applied.
    pub async fn settled(&self) {
        let mut receiver = self.shared.in_flight.subscribe();
        let _ = receiver.wait_for(|pending| *pending == 0).await;
    }

    fn spawn_enrichment(&self, record: &PhotoRecord) {
        self.shared.in_flight.send_modify(|pending| *pending += 1);

        let events = self.events.clone();
        let inference = Arc::clone(&self.inference);
        let id = record.id.clone();
        let image = record.raw_binary.clone();
        let mime_type = record.mime_type.clone();

        tokio::spawn(async move {
            let _ = events.send(PipelineEvent::EnrichmentStarted { id: id.clone() });
            let result = inference.analyze(&image, &mime_type).await;
            if events
                .send(PipelineEvent::EnrichmentFinished { id, result })
                .is_err()
            {
                warn!("Enrichment applier has stopped; dropping analysis result");
            }
        });
    }

    fn spawn_relocation(&self, record: &PhotoRecord, latitude: f64, longitude: f64) {
        self.shared.in_flight.send_modify(|pending| *pending += 1);

        let events = self.events.clone();
        let inference = Arc::clone(&self.inference);
        let id = record.id.clone();
        let image = record.raw_binary.clone();
        let mime_type = record.mime_type.clone();

        tokio::spawn(async move {
            let result = inference
                .identify_location_name(latitude, longitude, &image, &mime_type)
                .await;
            let event = PipelineEvent::RelocationFinished {
                id,
                latitude,
                longitude,
                result,
            };
            if events.send(event).is_err() {
                warn!("Enrichment applier has stopped; dropping location name");
            }
        });
    }
}

async fn run_applier(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<PipelineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            PipelineEvent::EnrichmentStarted { id } => shared.mark_enriching(&id).await,
            PipelineEvent::EnrichmentFinished { id, result } => {
                shared.apply_enrichment(&id, result).await;
                shared.finish_one();
            }
            PipelineEvent::RelocationFinished {
                id,
                latitude,
                longitude,
                result,
            } => {
                shared
                    .apply_relocation(&id, latitude, longitude, result)
                    .await;
                shared.finish_one();
            }
        }
    }
    debug!("Enrichment applier stopped");
}

impl Shared {
    async fn mark_enriching(&self, id: &str) {
        let _library = self.library.read().await;
        let _guard = self.store.lock_id(id).await;
        match self.store.find_by_id(id).await {
            Some(current) if current.status == EnrichmentStatus::Provisional => {}
            _ => return,
        }
        let patch = PhotoPatch {
            status: Some(EnrichmentStatus::Enriching),
            ..Default::default()
        };
        if let Some(updated) = self.store.merge(id, patch).await {
            self.persist_logged(&updated).await;
        }
    }

    async fn apply_enrichment(&self, id: &str, result: Result<PhotoAnalysis, InferenceError>) {
        let _library = self.library.read().await;
        let _guard = self.store.lock_id(id).await;
        let Some(current) = self.store.find_by_id(id).await else {
            debug!(photo_id = %id, "Dropping analysis for a deleted photo");
            return;
        };

        let patch = match result {
            Ok(analysis) => {
                info!(photo_id = %id, location = %analysis.location_name, "Photo analyzed");
                analysis_patch(&current, &analysis)
            }
            Err(e) => {
                warn!(photo_id = %id, "Photo analysis failed: {e}");
                analysis_failure_patch(&current)
            }
        };
        if patch.is_empty() {
            return;
        }
        if let Some(updated) = self.store.merge(id, patch).await {
            self.persist_logged(&updated).await;
        }
    }

    async fn apply_relocation(
        &self,
        id: &str,
        latitude: f64,
        longitude: f64,
        result: Result<String, InferenceError>,
    ) {
        let _library = self.library.read().await;
        let _guard = self.store.lock_id(id).await;
        let Some(current) = self.store.find_by_id(id).await else {
            debug!(photo_id = %id, "Dropping location name for a deleted photo");
            return;
        };
        if current.latitude != latitude || current.longitude != longitude {
            debug!(photo_id = %id, "Dropping location name for superseded placement");
            return;
        }

        let patch = match result {
            Ok(name) => PhotoPatch {
                location_name: Some(name),
                status: Some(EnrichmentStatus::Enriched),
                ..Default::default()
            },
            Err(e) => {
                warn!(photo_id = %id, "Location naming failed: {e}");
                PhotoPatch {
                    location_name: Some(LOCATION_UNIDENTIFIED.to_string()),
                    status: Some(EnrichmentStatus::RelocationFailed),
                    ..Default::default()
                }
            }
        };
        if let Some(updated) = self.store.merge(id, patch).await {
            self.persist_logged(&updated).await;
        }
    }

    /// Background writes have no caller to report to; memory stays ahead of disk.
    async fn persist_logged(&self, record: &PhotoRecord) {
        if let Err(e) = self.repo.persist_photo(record).await {
            error!(photo_id = %record.id, "Failed to persist photo: {e}");
        }
    }

    fn finish_one(&self) {
        self.in_flight
            .send_modify(|pending| *pending = pending.saturating_sub(1));
    }
}

/// Merge for a successful analysis. The date is recomputed with all three signals.
fn analysis_patch(current: &PhotoRecord, analysis: &PhotoAnalysis) -> PhotoPatch {
    let mut patch = PhotoPatch {
        capture_date: Some(resolve_capture_date(
            &current.file_name,
            analysis.date.as_deref(),
            current.last_modified,
        )),
        description: Some(analysis.description.clone()),
        ..Default::default()
    };
    if !current.manually_placed {
        patch.location_name = Some(analysis.location_name.clone());
        patch.country = Some(analysis.country.clone());
        patch.latitude = Some(analysis.latitude);
        patch.longitude = Some(analysis.longitude);
        patch.status = Some(EnrichmentStatus::Enriched);
    }
    patch
}

fn analysis_failure_patch(current: &PhotoRecord) -> PhotoPatch {
    if current.manually_placed {
        return PhotoPatch::default();
    }
    PhotoPatch {
        location_name: Some(LOCATION_ANALYSIS_FAILED.to_string()),
        latitude: Some(0.0),
        longitude: Some(0.0),
        status: Some(EnrichmentStatus::EnrichmentFailed),
        ..Default::default()
    }
}

fn relocation_patch(latitude: f64, longitude: f64) -> PhotoPatch {
    PhotoPatch {
        latitude: Some(latitude),
        longitude: Some(longitude),
        manually_placed: Some(true),
        status: Some(EnrichmentStatus::Relocating),
        location_name: Some(LOCATION_RESOLVING.to_string()),
        ..Default::default()
    }
}

fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), AppError> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(AppError::Validation(format!(
            "Latitude {latitude} is outside [-90, 90]"
        )));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(AppError::Validation(format!(
            "Longitude {longitude} is outside [-180, 180]"
        )));
    }
    if latitude == 0.0 && longitude == 0.0 {
        return Err(AppError::Validation(
            "(0, 0) is reserved for photos without a location".to_string(),
        ));
    }
    Ok(())
}
