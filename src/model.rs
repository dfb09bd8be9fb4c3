//! Domain and wire types shared by the client, the workspace and the
//! rendering layers.
//!
//! Wire types mirror the JSON the diagnosis backend speaks (camelCase keys);
//! domain types (`SubmissionPayload`, `Report`) are what the workspace holds.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Patient intake
// ---------------------------------------------------------------------------

/// Patient gender as offered by the intake form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub const ALL: [Gender; 3] = [Gender::Male, Gender::Female, Gender::Other];

    /// Parse a gender from free text, case-insensitively.
    pub fn parse(val: &str) -> Option<Self> {
        match val.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Some(Self::Male),
            "female" | "f" => Some(Self::Female),
            "other" | "o" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "Male",
            Self::Female => "Female",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An image selected for upload. The bytes are shared so the payload can be
/// handed to a worker thread without copying the blob.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Arc<[u8]>,
}

impl ImageFile {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: Arc::from(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for ImageFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageFile")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A validated intake submission. Built by [`crate::form::FormInput::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionPayload {
    pub patient_name: String,
    pub patient_id: String,
    pub age: u32,
    pub gender: Gender,
    pub file: ImageFile,
    /// Local URL where the selected image can be previewed. Empty until the
    /// workspace registers the file with its preview store.
    pub preview_url: String,
}

impl SubmissionPayload {
    pub fn file_name(&self) -> &str {
        &self.file.file_name
    }

    /// Whether the payload still references an uploadable image.
    pub fn has_file(&self) -> bool {
        !self.file.file_name.is_empty() && !self.file.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Backend responses
// ---------------------------------------------------------------------------

/// `POST /predict` response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
}

/// `POST /explain` response body. Image fields are URLs or inline data URIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub gradcam: Option<String>,
    #[serde(default)]
    pub lime: Option<String>,
    #[serde(default)]
    pub occlusion: Option<String>,
}

/// `GET /patients/history` response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryResponse {
    #[serde(default)]
    pub reports: Vec<HistoryRecord>,
}

/// A past report as stored by the backend. Every field is optional because
/// older records may predate the explanation pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryRecord {
    pub report_id: Option<String>,
    pub patient_name: Option<String>,
    pub patient_id: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub patient_age: Option<String>,
    pub patient_gender: Option<String>,
    pub image_filename: Option<String>,
    pub source_image_url: Option<String>,
    pub diagnosis: Option<String>,
    pub confidence: Option<f64>,
    pub gradcam: Option<String>,
    pub lime: Option<String>,
    pub occlusion: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl HistoryRecord {
    /// Stable key used to select a record for preview.
    pub fn key(&self) -> String {
        if let Some(id) = non_empty(&self.report_id) {
            return id.to_string();
        }
        let patient = non_empty(&self.patient_id).unwrap_or("unknown");
        let suffix = non_empty(&self.created_at)
            .or_else(|| non_empty(&self.updated_at))
            .or_else(|| non_empty(&self.image_filename))
            .unwrap_or("report");
        format!("{patient}-{suffix}")
    }

    pub fn has_explanations(&self) -> bool {
        [&self.gradcam, &self.lime, &self.occlusion]
            .into_iter()
            .any(|img| non_empty(img).is_some())
    }

    pub fn diagnosis_display(&self) -> &str {
        non_empty(&self.diagnosis).unwrap_or("Pending inference")
    }

    pub fn confidence_display(&self) -> String {
        format_confidence(self.confidence.unwrap_or(0.0))
    }

    pub fn created_display(&self) -> String {
        format_timestamp(self.created_at.as_deref())
    }
}

fn non_empty(val: &Option<String>) -> Option<&str> {
    val.as_deref().filter(|s| !s.is_empty())
}

/// Accept `"21"`, `21` or `null` for fields some backends send as numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// The client-side aggregate of one submission: patient data from the
/// payload, the diagnosis from `/predict`, and explanation images from
/// `/explain` once they arrive.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub patient_name: String,
    pub patient_id: String,
    pub age: u32,
    pub gender: Gender,
    pub file_name: String,
    pub image_preview_url: String,
    pub diagnosis: String,
    pub confidence: f64,
    pub summary: Vec<String>,
    pub gradcam: Option<String>,
    pub lime: Option<String>,
    pub occlusion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Local>>,
}

impl Report {
    /// Build a fresh report from a payload and its prediction. Explanation
    /// fields start empty.
    pub fn from_prediction(payload: &SubmissionPayload, prediction: &Prediction) -> Self {
        let mut report = Self {
            patient_name: payload.patient_name.clone(),
            patient_id: payload.patient_id.clone(),
            age: payload.age,
            gender: payload.gender,
            file_name: payload.file_name().to_string(),
            image_preview_url: payload.preview_url.clone(),
            diagnosis: prediction.label.clone(),
            confidence: prediction.confidence,
            summary: Vec::new(),
            gradcam: None,
            lime: None,
            occlusion: None,
            generated_at: None,
        };
        report.refresh_summary();
        report
    }

    /// Merge an explanation response. Patient fields are left untouched;
    /// diagnosis, confidence and images follow the explanation.
    pub fn apply_explanation(&mut self, explanation: &Explanation, at: DateTime<Local>) {
        if let Some(label) = &explanation.label {
            self.diagnosis = label.clone();
        }
        if let Some(confidence) = explanation.confidence {
            self.confidence = confidence;
        }
        self.gradcam = explanation.gradcam.clone();
        self.lime = explanation.lime.clone();
        self.occlusion = explanation.occlusion.clone();
        self.generated_at = Some(at);
        self.refresh_summary();
    }

    pub fn has_explanations(&self) -> bool {
        self.gradcam.is_some() || self.lime.is_some() || self.occlusion.is_some()
    }

    pub fn is_normal(&self) -> bool {
        self.diagnosis.eq_ignore_ascii_case("normal")
    }

    pub fn confidence_display(&self) -> String {
        format_confidence(self.confidence)
    }

    /// The three explanation images in display order.
    pub fn explanation_images(&self) -> [(&'static str, Option<&str>); 3] {
        [
            ("Grad-CAM", self.gradcam.as_deref()),
            ("LIME", self.lime.as_deref()),
            ("Occlusion", self.occlusion.as_deref()),
        ]
    }

    fn refresh_summary(&mut self) {
        let mut summary = vec![
            format!(
                "Model predicts {} with {} confidence.",
                self.diagnosis,
                self.confidence_display()
            ),
            format!(
                "Patient {} ({}), {} years, {}.",
                self.patient_name, self.patient_id, self.age, self.gender
            ),
        ];
        if self.has_explanations() {
            summary.push("Grad-CAM, LIME and occlusion maps are available for review.".to_string());
        } else {
            summary.push("Open the XAI report to generate explainability maps.".to_string());
        }
        self.summary = summary;
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// Render a 0–100 confidence without trailing zeros: `92%`, `92.5%`.
pub fn format_confidence(confidence: f64) -> String {
    let rounded = (confidence * 100.0).round() / 100.0;
    let text = format!("{rounded:.2}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{text}%")
}

/// Render a backend timestamp in local time. Unparsable values are shown
/// verbatim; missing values read "Not available".
pub fn format_timestamp(value: Option<&str>) -> String {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return "Not available".to_string();
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return parsed.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string();
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return naive.format("%Y-%m-%d %H:%M:%S").to_string();
    }
    value.to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> SubmissionPayload {
        SubmissionPayload {
            patient_name: "za".to_string(),
            patient_id: "PID-111".to_string(),
            age: 21,
            gender: Gender::Male,
            file: ImageFile::new("chest.png", "image/png", vec![1, 2, 3]),
            preview_url: "/preview/1".to_string(),
        }
    }

    #[test]
    fn gender_parse_is_case_insensitive() {
        assert_eq!(Gender::parse("male"), Some(Gender::Male));
        assert_eq!(Gender::parse(" FEMALE "), Some(Gender::Female));
        assert_eq!(Gender::parse("o"), Some(Gender::Other));
        assert_eq!(Gender::parse("unknown"), None);
    }

    #[test]
    fn format_confidence_trims_zeros() {
        assert_eq!(format_confidence(92.0), "92%");
        assert_eq!(format_confidence(92.5), "92.5%");
        assert_eq!(format_confidence(87.456), "87.46%");
        assert_eq!(format_confidence(0.0), "0%");
    }

    #[test]
    fn format_timestamp_handles_missing_and_garbage() {
        assert_eq!(format_timestamp(None), "Not available");
        assert_eq!(format_timestamp(Some("")), "Not available");
        assert_eq!(format_timestamp(Some("yesterday")), "yesterday");
        assert_eq!(
            format_timestamp(Some("2025-03-01T10:20:30.123")),
            "2025-03-01 10:20:30"
        );
    }

    #[test]
    fn report_from_prediction_has_no_explanations() {
        let prediction = Prediction {
            label: "PNEUMONIA".to_string(),
            confidence: 92.0,
        };
        let report = Report::from_prediction(&payload(), &prediction);
        assert_eq!(report.diagnosis, "PNEUMONIA");
        assert_eq!(report.file_name, "chest.png");
        assert_eq!(report.image_preview_url, "/preview/1");
        assert!(!report.has_explanations());
        assert!(report.summary[0].contains("92%"));
    }

    #[test]
    fn apply_explanation_keeps_patient_fields() {
        let prediction = Prediction {
            label: "PNEUMONIA".to_string(),
            confidence: 92.0,
        };
        let mut report = Report::from_prediction(&payload(), &prediction);
        let explanation = Explanation {
            label: Some("NORMAL".to_string()),
            confidence: Some(71.5),
            gradcam: Some("url1".to_string()),
            lime: Some("url2".to_string()),
            occlusion: None,
        };
        report.apply_explanation(&explanation, Local::now());

        assert_eq!(report.patient_name, "za");
        assert_eq!(report.age, 21);
        assert_eq!(report.diagnosis, "NORMAL");
        assert!(report.is_normal());
        assert_eq!(report.gradcam.as_deref(), Some("url1"));
        assert!(report.occlusion.is_none());
        assert!(report.generated_at.is_some());
    }

    #[test]
    fn images_only_explanation_keeps_prediction() {
        let prediction = Prediction {
            label: "PNEUMONIA".to_string(),
            confidence: 92.0,
        };
        let mut report = Report::from_prediction(&payload(), &prediction);
        let explanation: Explanation =
            serde_json::from_str(r#"{"gradcam":"url1","lime":"url2","occlusion":"url3"}"#).unwrap();
        report.apply_explanation(&explanation, Local::now());

        assert_eq!(report.diagnosis, "PNEUMONIA");
        assert_eq!(report.confidence, 92.0);
        assert_eq!(report.lime.as_deref(), Some("url2"));
        assert!(report.has_explanations());
    }

    #[test]
    fn history_record_key_falls_back() {
        let mut record = HistoryRecord {
            report_id: Some("r-1".to_string()),
            ..Default::default()
        };
        assert_eq!(record.key(), "r-1");

        record.report_id = None;
        record.patient_id = Some("PID-1".to_string());
        record.updated_at = Some("2025-01-01".to_string());
        assert_eq!(record.key(), "PID-1-2025-01-01");

        let empty = HistoryRecord::default();
        assert_eq!(empty.key(), "unknown-report");
    }

    #[test]
    fn history_record_deserializes_numeric_age() {
        let json = r#"{"patientId":"PID-1","patientAge":42,"confidence":88.1,"lime":"x"}"#;
        let record: HistoryRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.patient_age.as_deref(), Some("42"));
        assert!(record.has_explanations());
        assert_eq!(record.diagnosis_display(), "Pending inference");
        assert_eq!(record.confidence_display(), "88.1%");
    }
}
