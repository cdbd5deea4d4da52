use std::sync::Arc;

use crate::config::Config;
use crate::photos::display::DisplayRegistry;
use crate::photos::enrichment::EnrichmentPipeline;
use crate::photos::store::PhotoStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Read side for every view. Writes go through `pipeline`.
    pub store: Arc<PhotoStore>,
    pub pipeline: EnrichmentPipeline,
    /// Session-scoped image bytes behind each record's display reference.
    pub displays: Arc<DisplayRegistry>,
    pub config: Config,
}
