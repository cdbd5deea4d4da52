//! Image-understanding boundary.
//!
//! The pipeline only ever sees [`InferenceService`]; `LlmInferenceService` is the
//! production backend. Both calls are fallible and may take seconds, and the
//! pipeline turns any failure into sentinel values on the record.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::llm_client::prompts::JSON_ONLY_SYSTEM;
use crate::llm_client::{ImageInput, LlmClient, LlmError};

pub mod prompts;

#[cfg(test)]
pub(crate) mod fake;

use prompts::{locate_prompt, ANALYZE_PROMPT, PHOTO_ANALYST_SYSTEM};

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Inference backend failed: {0}")]
    Backend(#[from] LlmError),

    #[error("Malformed inference response: {0}")]
    Malformed(String),
}

/// Structured guess about a photo. Coordinates that are missing or not numeric
/// come back as `0.0`, which downstream means "unknown".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoAnalysis {
    #[serde(alias = "locationName")]
    pub location_name: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default, deserialize_with = "lenient_coordinate")]
    pub latitude: f64,
    #[serde(default, deserialize_with = "lenient_coordinate")]
    pub longitude: f64,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct LocationNameAnswer {
    #[serde(alias = "locationName")]
    location_name: String,
}

/// The image-understanding capability consumed by the enrichment pipeline.
#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn analyze(&self, image: &[u8], mime_type: &str)
        -> Result<PhotoAnalysis, InferenceError>;

    async fn identify_location_name(
        &self,
        latitude: f64,
        longitude: f64,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String, InferenceError>;
}

/// Vision-model backend built on the shared [`LlmClient`].
pub struct LlmInferenceService {
    llm: LlmClient,
    system: String,
}

impl LlmInferenceService {
    pub fn new(llm: LlmClient) -> Self {
        Self {
            llm,
            system: format!("{PHOTO_ANALYST_SYSTEM} {JSON_ONLY_SYSTEM}"),
        }
    }
}

#[async_trait]
impl InferenceService for LlmInferenceService {
    async fn analyze(
        &self,
        image: &[u8],
        mime_type: &str,
    ) -> Result<PhotoAnalysis, InferenceError> {
        let image = ImageInput {
            bytes: image,
            mime_type,
        };
        let analysis: PhotoAnalysis = self
            .llm
            .call_with_image_json(ANALYZE_PROMPT, &self.system, image)
            .await?;
        validate_analysis(analysis)
    }

    async fn identify_location_name(
        &self,
        latitude: f64,
        longitude: f64,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String, InferenceError> {
        let image = ImageInput {
            bytes: image,
            mime_type,
        };
        let answer: LocationNameAnswer = self
            .llm
            .call_with_image_json(&locate_prompt(latitude, longitude), &self.system, image)
            .await?;
        let name = answer.location_name.trim();
        if name.is_empty() {
            return Err(InferenceError::Malformed("empty location name".to_string()));
        }
        Ok(name.to_string())
    }
}

fn validate_analysis(mut analysis: PhotoAnalysis) -> Result<PhotoAnalysis, InferenceError> {
    analysis.location_name = analysis.location_name.trim().to_string();
    if analysis.location_name.is_empty() {
        return Err(InferenceError::Malformed("empty location name".to_string()));
    }
    analysis.country = analysis
        .country
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    Ok(analysis)
}

/// Accepts numbers and numeric strings; anything else, and non-finite values, become `0.0`.
fn lenient_coordinate<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let coordinate = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(coordinate.filter(|c| c.is_finite()).unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_parses_full_answer() {
        let analysis: PhotoAnalysis = serde_json::from_str(
            r#"{"location_name":"Shibuya Crossing, Tokyo","country":"Japan",
                "latitude":35.6595,"longitude":139.7005,"date":"2023:04:01",
                "description":"A busy crossing at dusk"}"#,
        )
        .unwrap();
        assert_eq!(analysis.location_name, "Shibuya Crossing, Tokyo");
        assert_eq!(analysis.country.as_deref(), Some("Japan"));
        assert_eq!(analysis.latitude, 35.6595);
        assert_eq!(analysis.longitude, 139.7005);
        assert_eq!(analysis.date.as_deref(), Some("2023:04:01"));
    }

    #[test]
    fn test_analysis_accepts_camel_case_and_string_coordinates() {
        let analysis: PhotoAnalysis = serde_json::from_str(
            r#"{"locationName":"Reykjavik","latitude":"64.1466","longitude":"-21.9426"}"#,
        )
        .unwrap();
        assert_eq!(analysis.location_name, "Reykjavik");
        assert_eq!(analysis.latitude, 64.1466);
        assert_eq!(analysis.longitude, -21.9426);
        assert_eq!(analysis.country, None);
        assert_eq!(analysis.date, None);
        assert_eq!(analysis.description, "");
    }

    #[test]
    fn test_non_numeric_coordinates_become_unknown() {
        let analysis: PhotoAnalysis = serde_json::from_str(
            r#"{"location_name":"Somewhere","latitude":"north-ish","longitude":null}"#,
        )
        .unwrap();
        assert_eq!((analysis.latitude, analysis.longitude), (0.0, 0.0));
    }

    #[test]
    fn test_validate_rejects_blank_location() {
        let analysis = PhotoAnalysis {
            location_name: "   ".to_string(),
            country: None,
            latitude: 0.0,
            longitude: 0.0,
            date: None,
            description: String::new(),
        };
        assert!(matches!(
            validate_analysis(analysis),
            Err(InferenceError::Malformed(_))
        ));
    }

    #[test]
    fn test_validate_drops_blank_country() {
        let analysis = PhotoAnalysis {
            location_name: " Oslo ".to_string(),
            country: Some("  ".to_string()),
            latitude: 59.9,
            longitude: 10.7,
            date: None,
            description: String::new(),
        };
        let analysis = validate_analysis(analysis).unwrap();
        assert_eq!(analysis.location_name, "Oslo");
        assert_eq!(analysis.country, None);
    }
}
