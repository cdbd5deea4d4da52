//! Scripted [`InferenceService`] for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{InferenceError, InferenceService, PhotoAnalysis};

pub(crate) struct FakeInference {
    analysis: Result<PhotoAnalysis, String>,
    location_name: Result<String, String>,
    analyze_gate: Option<Arc<Semaphore>>,
    locate_gate: Option<Arc<Semaphore>>,
    pub analyze_calls: AtomicUsize,
    pub locate_calls: AtomicUsize,
}

impl FakeInference {
    pub fn succeeding(analysis: PhotoAnalysis) -> Self {
        Self {
            analysis: Ok(analysis),
            location_name: Ok("Resolved Place".to_string()),
            analyze_gate: None,
            locate_gate: None,
            analyze_calls: AtomicUsize::new(0),
            locate_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            analysis: Err("service unavailable".to_string()),
            location_name: Err("service unavailable".to_string()),
            ..Self::succeeding(analysis("unused", 0.0, 0.0))
        }
    }

    pub fn with_location_name(mut self, name: Result<&str, &str>) -> Self {
        self.location_name = name.map(str::to_string).map_err(str::to_string);
        self
    }

    /// `analyze` waits for a permit on the semaphore before answering.
    pub fn gate_analyze(mut self, gate: Arc<Semaphore>) -> Self {
        self.analyze_gate = Some(gate);
        self
    }

    /// `identify_location_name` waits for a permit on the semaphore before answering.
    pub fn gate_locate(mut self, gate: Arc<Semaphore>) -> Self {
        self.locate_gate = Some(gate);
        self
    }
}

pub(crate) fn analysis(location_name: &str, latitude: f64, longitude: f64) -> PhotoAnalysis {
    PhotoAnalysis {
        location_name: location_name.to_string(),
        country: None,
        latitude,
        longitude,
        date: None,
        description: String::new(),
    }
}

async fn pass(gate: &Option<Arc<Semaphore>>) {
    if let Some(gate) = gate {
        gate.acquire().await.unwrap().forget();
    }
}

#[async_trait]
impl InferenceService for FakeInference {
    async fn analyze(
        &self,
        _image: &[u8],
        _mime_type: &str,
    ) -> Result<PhotoAnalysis, InferenceError> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        pass(&self.analyze_gate).await;
        self.analysis.clone().map_err(InferenceError::Malformed)
    }

    async fn identify_location_name(
        &self,
        _latitude: f64,
        _longitude: f64,
        _image: &[u8],
        _mime_type: &str,
    ) -> Result<String, InferenceError> {
        self.locate_calls.fetch_add(1, Ordering::SeqCst);
        pass(&self.locate_gate).await;
        self.location_name.clone().map_err(InferenceError::Malformed)
    }
}
