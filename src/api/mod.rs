//! HTTP client for the diagnosis backend.
//!
//! Wraps the three endpoints the workspace needs, using the synchronous
//! `ureq` client:
//!
//! - `POST /predict` — multipart intake form → `{label, confidence}`
//! - `POST /explain` — same form → diagnosis plus Grad-CAM/LIME/occlusion images
//! - `GET /patients/history?patientId=` — past reports
//!
//! Every call is a single best-effort attempt: no retries, no request
//! timeout, no backoff. Failures are normalized into [`ApiError`] whose
//! `Display` is the message shown to the user.

mod error;

use std::io::Read;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;

use crate::analytics::logger;
use crate::config::PneumoConfig;
use crate::model::{Explanation, HistoryResponse, Prediction, SubmissionPayload};
use crate::multipart::MultipartForm;

pub use error::ApiError;

/// The operations the workspace needs from a diagnosis backend.
///
/// [`HttpBackend`] is the production implementation; tests substitute an
/// in-memory fake.
pub trait DiagnosisBackend {
    fn submit_prediction(&self, payload: &SubmissionPayload) -> Result<Prediction, ApiError>;

    fn submit_explanation(&self, payload: &SubmissionPayload) -> Result<Explanation, ApiError>;

    /// Fetch past reports. An empty `patient_id` asks for every patient.
    fn fetch_history(&self, patient_id: &str) -> Result<HistoryResponse, ApiError>;
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// `ureq`-backed implementation of [`DiagnosisBackend`].
///
/// Cheap to clone; the agent shares its connection pool between clones, so
/// one instance can be handed to the explanation worker thread.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    agent: ureq::Agent,
    base_url: String,
    log_requests: bool,
    mask_patient_ids: bool,
}

impl HttpBackend {
    /// Build a client from the resolved config.
    pub fn from_config(config: &PneumoConfig) -> Self {
        let mut backend = Self::new(&config.api.base_url);
        backend.log_requests = config.logging.enabled;
        backend.mask_patient_ids = config.logging.mask_patient_ids;
        backend
    }

    /// Build a client for `base_url` with request logging disabled.
    pub fn new(base_url: &str) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
            base_url: base_url.trim_end_matches('/').to_string(),
            log_requests: false,
            mask_patient_ids: true,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check whether anything answers at the base URL.
    ///
    /// Any HTTP response counts, including 404: the backend exposes no
    /// health endpoint, so only transport failures mean "unreachable".
    pub fn is_reachable(&self) -> bool {
        let result = self
            .agent
            .get(&self.base_url)
            .timeout(Duration::from_secs(5))
            .call();
        matches!(result, Ok(_) | Err(ureq::Error::Status(..)))
    }

    fn post_form<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        payload: &SubmissionPayload,
    ) -> Result<T, ApiError> {
        let form = build_form(payload);
        let url = format!("{}{endpoint}", self.base_url);
        let start = Instant::now();

        let result = self
            .agent
            .post(&url)
            .set("Content-Type", &form.content_type())
            .set("Accept", "application/json")
            .send_bytes(&form.encode());

        let outcome = read_response(endpoint, result);
        self.log(endpoint, &payload.patient_id, start, &outcome);
        outcome.map(|(_, value)| value)
    }

    fn log<T>(&self, endpoint: &str, patient_id: &str, start: Instant, outcome: &Result<(u16, T), ApiError>) {
        if !self.log_requests {
            return;
        }
        let latency_ms = start.elapsed().as_millis() as u64;
        let (status, error) = match outcome {
            Ok((status, _)) => (Some(*status), None),
            Err(e) => (e.status(), Some(e.to_string())),
        };
        let patient = if self.mask_patient_ids {
            logger::mask_patient_id(patient_id)
        } else {
            patient_id.to_string()
        };
        logger::log_request(endpoint, &patient, status, latency_ms, error.as_deref());
    }
}

impl DiagnosisBackend for HttpBackend {
    fn submit_prediction(&self, payload: &SubmissionPayload) -> Result<Prediction, ApiError> {
        self.post_form("/predict", payload)
    }

    fn submit_explanation(&self, payload: &SubmissionPayload) -> Result<Explanation, ApiError> {
        self.post_form("/explain", payload)
    }

    fn fetch_history(&self, patient_id: &str) -> Result<HistoryResponse, ApiError> {
        let endpoint = "/patients/history";
        let url = format!("{}{endpoint}", self.base_url);
        let mut request = self.agent.get(&url).set("Accept", "application/json");
        if !patient_id.is_empty() {
            request = request.query("patientId", patient_id);
        }

        let start = Instant::now();
        let outcome = read_response(endpoint, request.call());
        self.log(endpoint, patient_id, start, &outcome);
        outcome.map(|(_, value)| value)
    }
}

// ---------------------------------------------------------------------------
// Request / response helpers
// ---------------------------------------------------------------------------

/// Assemble the intake form exactly as the backend expects it.
pub fn build_form(payload: &SubmissionPayload) -> MultipartForm {
    MultipartForm::new()
        .file("file", &payload.file)
        .text("patientName", payload.patient_name.as_str())
        .text("patientId", payload.patient_id.as_str())
        .text("patientAge", payload.age.to_string())
        .text("patientGender", payload.gender.as_str())
}

/// Turn a `ureq` result into a decoded body or an [`ApiError`], keeping the
/// status code for the request log.
fn read_response<T: DeserializeOwned>(
    endpoint: &'static str,
    result: Result<ureq::Response, ureq::Error>,
) -> Result<(u16, T), ApiError> {
    match result {
        Ok(resp) => {
            let status = resp.status();
            // Inline data-URI images can exceed `into_string`'s 10 MB cap.
            let mut body = String::new();
            resp.into_reader()
                .read_to_string(&mut body)
                .map_err(|e| ApiError::Decode {
                    endpoint,
                    reason: e.to_string(),
                })?;
            error::decode_success(endpoint, &body).map(|value| (status, value))
        }
        Err(ureq::Error::Status(status, resp)) => {
            let body = resp.into_string().unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
        Err(ureq::Error::Transport(transport)) => Err(ApiError::Transport(transport.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
