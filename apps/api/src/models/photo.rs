use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Route prefix under which display references are served.
pub const DISPLAY_ROUTE_PREFIX: &str = "/api/v1/display";

/// Enrichment lifecycle of a single photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    Provisional,
    Enriching,
    Enriched,
    EnrichmentFailed,
    Relocating,
    RelocationFailed,
}

impl EnrichmentStatus {
    /// True while a call to the inference service is pending for the photo.
    pub fn is_processing(self) -> bool {
        matches!(self, Self::Provisional | Self::Enriching | Self::Relocating)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provisional => "provisional",
            Self::Enriching => "enriching",
            Self::Enriched => "enriched",
            Self::EnrichmentFailed => "enrichment_failed",
            Self::Relocating => "relocating",
            Self::RelocationFailed => "relocation_failed",
        }
    }
}

impl std::str::FromStr for EnrichmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisional" => Ok(Self::Provisional),
            "enriching" => Ok(Self::Enriching),
            "enriched" => Ok(Self::Enriched),
            "enrichment_failed" => Ok(Self::EnrichmentFailed),
            "relocating" => Ok(Self::Relocating),
            "relocation_failed" => Ok(Self::RelocationFailed),
            other => Err(format!("unknown enrichment status '{other}'")),
        }
    }
}

/// Session-scoped handle that lets a view render a photo.
/// Regenerated from the stored bytes on every load, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayRef(Uuid);

impl DisplayRef {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn token(&self) -> Uuid {
        self.0
    }

    pub fn url(&self) -> String {
        format!("{DISPLAY_ROUTE_PREFIX}/{}", self.0)
    }
}

impl Default for DisplayRef {
    fn default() -> Self {
        Self::new()
    }
}

/// The canonical metadata record for one uploaded photo.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoRecord {
    pub id: String,
    pub file_name: String,
    pub mime_type: String,
    /// Original file contents. Required to re-run inference after relocation.
    pub raw_binary: Bytes,
    pub display_reference: Option<DisplayRef>,
    /// Always `YYYY-MM-DD`.
    pub capture_date: String,
    pub location_name: String,
    pub country: Option<String>,
    /// `(0, 0)` means "no location known".
    pub latitude: f64,
    pub longitude: f64,
    pub description: String,
    pub status: EnrichmentStatus,
    pub manually_placed: bool,
    /// File-system last-modified time of the upload, in Unix milliseconds.
    pub last_modified: i64,
    /// Upload time in Unix milliseconds; orders the timeline.
    pub uploaded_at: i64,
}

impl PhotoRecord {
    pub fn is_processing(&self) -> bool {
        self.status.is_processing()
    }

    pub fn has_image_data(&self) -> bool {
        !self.raw_binary.is_empty()
    }

    /// Shallow field-level merge: every field present in the patch overwrites,
    /// everything else is kept.
    pub fn apply(&mut self, patch: PhotoPatch) {
        if let Some(capture_date) = patch.capture_date {
            self.capture_date = capture_date;
        }
        if let Some(location_name) = patch.location_name {
            self.location_name = location_name;
        }
        if let Some(country) = patch.country {
            self.country = country;
        }
        if let Some(latitude) = patch.latitude {
            self.latitude = latitude;
        }
        if let Some(longitude) = patch.longitude {
            self.longitude = longitude;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(manually_placed) = patch.manually_placed {
            self.manually_placed = manually_placed;
        }
    }
}

/// Partial update of a [`PhotoRecord`]. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoPatch {
    pub capture_date: Option<String>,
    pub location_name: Option<String>,
    pub country: Option<Option<String>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: Option<String>,
    pub status: Option<EnrichmentStatus>,
    pub manually_placed: Option<bool>,
}

impl PhotoPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Stable photo identity: identical re-uploads map to the same id.
pub fn photo_id(file_name: &str, size: usize, last_modified_ms: i64) -> String {
    format!("{file_name}-{size}-{last_modified_ms}")
}

/// JSON view of a record handed to the presentation layer.
/// The raw bytes are never serialized; views fetch them through `display_url`.
#[derive(Debug, Clone, Serialize)]
pub struct PhotoView {
    pub id: String,
    pub file_name: String,
    pub mime_type: String,
    pub display_url: Option<String>,
    pub capture_date: String,
    pub location_name: String,
    pub country: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub description: String,
    pub status: EnrichmentStatus,
    pub is_processing: bool,
    pub manually_placed: bool,
    pub uploaded_at: i64,
    pub note: Option<String>,
}

impl PhotoView {
    pub fn new(record: &PhotoRecord, note: Option<String>) -> Self {
        Self {
            id: record.id.clone(),
            file_name: record.file_name.clone(),
            mime_type: record.mime_type.clone(),
            display_url: record.display_reference.map(|d| d.url()),
            capture_date: record.capture_date.clone(),
            location_name: record.location_name.clone(),
            country: record.country.clone(),
            latitude: record.latitude,
            longitude: record.longitude,
            description: record.description.clone(),
            status: record.status,
            is_processing: record.is_processing(),
            manually_placed: record.manually_placed,
            uploaded_at: record.uploaded_at,
            note,
        }
    }
}

impl From<&PhotoRecord> for PhotoView {
    fn from(record: &PhotoRecord) -> Self {
        Self::new(record, None)
    }
}

#[cfg(test)]
pub(crate) fn sample_record(id: &str, capture_date: &str) -> PhotoRecord {
    PhotoRecord {
        id: id.to_string(),
        file_name: format!("{id}.jpg"),
        mime_type: "image/jpeg".to_string(),
        raw_binary: Bytes::from_static(b"\xFF\xD8fake-jpeg\xFF\xD9"),
        display_reference: None,
        capture_date: capture_date.to_string(),
        location_name: "Somewhere".to_string(),
        country: None,
        latitude: 0.0,
        longitude: 0.0,
        description: String::new(),
        status: EnrichmentStatus::Enriched,
        manually_placed: false,
        last_modified: 0,
        uploaded_at: 0,
    }
}
