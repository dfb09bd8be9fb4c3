/// Page-state machine tests.
///
/// Drives [`Workspace`] through an in-memory backend with synthetic
/// `Instant` offsets, so progress timing is checked without sleeping.
use std::cell::RefCell;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;

use pneumo::api::{ApiError, DiagnosisBackend};
use pneumo::form::{FormInput, ValidationError};
use pneumo::model::{Explanation, HistoryRecord, HistoryResponse, ImageFile, Prediction, SubmissionPayload};
use pneumo::workspace::progress::{ProgressSettings, SIMULATED_CEILING, Stage};
use pneumo::workspace::{Page, Workspace, WorkspaceError, XaiPhase};

// ---------------------------------------------------------------------------
// Fake backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Predict(String),
    Explain(String),
    History(String),
}

struct FakeBackend {
    prediction: Result<Prediction, ApiError>,
    explanation: Result<Explanation, ApiError>,
    history: Result<HistoryResponse, ApiError>,
    calls: RefCell<Vec<Call>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            prediction: Ok(Prediction {
                label: "PNEUMONIA".to_string(),
                confidence: 92.0,
            }),
            explanation: Ok(Explanation {
                label: None,
                confidence: None,
                gradcam: Some("url1".to_string()),
                lime: Some("url2".to_string()),
                occlusion: Some("url3".to_string()),
            }),
            history: Ok(HistoryResponse::default()),
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl FakeBackend {
    fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }
}

impl DiagnosisBackend for FakeBackend {
    fn submit_prediction(&self, payload: &SubmissionPayload) -> Result<Prediction, ApiError> {
        self.calls.borrow_mut().push(Call::Predict(payload.patient_id.clone()));
        self.prediction.clone()
    }

    fn submit_explanation(&self, payload: &SubmissionPayload) -> Result<Explanation, ApiError> {
        self.calls.borrow_mut().push(Call::Explain(payload.patient_id.clone()));
        self.explanation.clone()
    }

    fn fetch_history(&self, patient_id: &str) -> Result<HistoryResponse, ApiError> {
        self.calls.borrow_mut().push(Call::History(patient_id.to_string()));
        self.history.clone()
    }
}

fn input(patient_id: &str) -> FormInput {
    FormInput {
        patient_name: "za".to_string(),
        patient_id: patient_id.to_string(),
        age: "21".to_string(),
        gender: "Male".to_string(),
        file: Some(ImageFile::new("chest.png", "image/png", vec![0x89, 0x50, 0x4e, 0x47])),
    }
}

fn settings() -> ProgressSettings {
    ProgressSettings {
        enabled: true,
        tick: Duration::from_millis(100),
        min_step: 2.0,
        max_step: 9.0,
        min_visible: Duration::from_millis(1500),
        total_steps: 500,
    }
}

fn ms(t0: Instant, offset: u64) -> Instant {
    t0 + Duration::from_millis(offset)
}

// ---------------------------------------------------------------------------
// Example scenario
// ---------------------------------------------------------------------------

#[test]
fn predict_then_explain_fills_report() {
    let backend = FakeBackend::default();
    let mut ws = Workspace::new(settings());
    let mut rng = StdRng::seed_from_u64(3);
    let t0 = Instant::now();

    ws.submit(&backend, input("PID-111")).unwrap();
    assert_eq!(ws.page(), Page::Analysis);
    let report = ws.report().unwrap();
    assert_eq!(report.diagnosis, "PNEUMONIA");
    assert_eq!(report.confidence_display(), "92%");
    assert!(!report.has_explanations());
    assert_eq!(ws.payload().unwrap().file_name(), "chest.png");

    let ticket = ws.open_report(t0).unwrap().unwrap();
    assert_eq!(ws.page(), Page::Xai);
    assert!(ws.is_loading());

    let settlement = ticket.run(&backend);
    ws.settle(settlement, ms(t0, 300));
    ws.poll(ms(t0, 1600), &mut rng);

    assert!(!ws.is_loading());
    let report = ws.report().unwrap();
    assert_eq!(report.gradcam.as_deref(), Some("url1"));
    assert_eq!(report.lime.as_deref(), Some("url2"));
    assert_eq!(report.occlusion.as_deref(), Some("url3"));
    assert!(report.generated_at.is_some());
    assert_eq!(ws.xai().progress().map(|p| p.percent()), Some(100.0));

    assert_eq!(
        backend.calls(),
        vec![Call::Predict("PID-111".to_string()), Call::Explain("PID-111".to_string())]
    );
}

// ---------------------------------------------------------------------------
// Failures and preconditions
// ---------------------------------------------------------------------------

#[test]
fn prediction_failure_stays_on_form_without_report() {
    let backend = FakeBackend {
        prediction: Err(ApiError::from_status(500, r#"{"error":"model not loaded"}"#)),
        ..FakeBackend::default()
    };
    let mut ws = Workspace::default();

    let err = ws.submit(&backend, input("PID-111")).unwrap_err();
    assert_eq!(err.to_string(), "model not loaded");
    assert_eq!(ws.page(), Page::Form);
    assert!(ws.report().is_none());
    assert_eq!(ws.banner(), Some("model not loaded"));
    assert!(!ws.is_loading());
    assert_eq!(ws.draft().patient_id, "PID-111");
    assert!(ws.previews().is_empty());
}

#[test]
fn validation_failure_sends_nothing() {
    let backend = FakeBackend::default();
    let mut ws = Workspace::default();
    let mut bad = input("PID-111");
    bad.age = "twenty".to_string();

    let err = ws.submit(&backend, bad).unwrap_err();
    assert_eq!(
        err,
        WorkspaceError::Validation(ValidationError::InvalidAge("twenty".to_string()))
    );
    assert!(backend.calls().is_empty());

    let mut no_image = input("PID-111");
    no_image.file = None;
    assert!(matches!(
        ws.submit(&backend, no_image),
        Err(WorkspaceError::Validation(ValidationError::MissingImage))
    ));
    assert!(backend.calls().is_empty());
}

#[test]
fn explanation_without_prediction_is_refused_locally() {
    let backend = FakeBackend::default();
    let mut ws = Workspace::default();

    let err = ws.open_report(Instant::now()).unwrap_err();
    assert!(matches!(err, WorkspaceError::Precondition(_)));
    assert_eq!(ws.page(), Page::Form);
    assert!(ws.banner().is_some());
    assert!(backend.calls().is_empty());
}

#[test]
fn explanation_failure_offers_identical_retry() {
    let backend = FakeBackend {
        explanation: Err(ApiError::Transport("connection refused".to_string())),
        ..FakeBackend::default()
    };
    let mut ws = Workspace::new(settings());
    let t0 = Instant::now();
    ws.submit(&backend, input("PID-111")).unwrap();

    let first = ws.open_report(t0).unwrap().unwrap();
    let first_payload = first.payload().clone();
    ws.settle(first.run(&backend), ms(t0, 200));
    assert!(ws.is_loading(), "failure is held for the minimum visible time");

    ws.poll(ms(t0, 1500), &mut StdRng::seed_from_u64(0));
    assert_eq!(ws.page(), Page::Xai);
    assert_eq!(ws.xai().error(), Some("network error: connection refused"));
    assert!(!ws.report().unwrap().has_explanations());

    let retry = ws.retry_explanation(ms(t0, 2000)).unwrap();
    assert_eq!(retry.payload(), &first_payload);
    assert!(ws.xai().progress().is_some_and(|p| p.percent() == 0.0));
}

// ---------------------------------------------------------------------------
// Progress timing
// ---------------------------------------------------------------------------

#[test]
fn loading_lasts_at_least_min_visible() {
    let backend = FakeBackend::default();
    let mut ws = Workspace::new(settings());
    let mut rng = StdRng::seed_from_u64(9);
    let t0 = Instant::now();
    ws.submit(&backend, input("PID-111")).unwrap();
    let ticket = ws.open_report(t0).unwrap().unwrap();

    for offset in (0..300).step_by(100) {
        ws.poll(ms(t0, offset), &mut rng);
    }
    ws.settle(ticket.run(&backend), ms(t0, 300));

    for offset in (300..1500).step_by(50) {
        ws.poll(ms(t0, offset), &mut rng);
        assert!(ws.is_loading(), "still loading at {offset}ms");
    }
    ws.poll(ms(t0, 1500), &mut rng);
    assert!(!ws.is_loading());
}

#[test]
fn ticker_stops_on_settlement() {
    let backend = FakeBackend::default();
    let mut ws = Workspace::new(settings());
    let mut rng = StdRng::seed_from_u64(5);
    let t0 = Instant::now();
    ws.submit(&backend, input("PID-111")).unwrap();
    let ticket = ws.open_report(t0).unwrap().unwrap();

    ws.poll(ms(t0, 250), &mut rng);
    let progress = ws.xai().progress().unwrap();
    assert!(progress.is_timer_active());

    ws.settle(ticket.run(&backend), ms(t0, 300));
    let frozen = ws.xai().progress().unwrap().percent();
    assert!(!ws.xai().progress().unwrap().is_timer_active());

    ws.poll(ms(t0, 1000), &mut rng);
    assert_eq!(ws.xai().progress().unwrap().percent(), frozen);
    assert!(frozen < SIMULATED_CEILING);
}

#[test]
fn simulation_never_completes_on_its_own() {
    let backend = FakeBackend::default();
    let mut ws = Workspace::new(settings());
    let mut rng = StdRng::seed_from_u64(21);
    let t0 = Instant::now();
    ws.submit(&backend, input("PID-111")).unwrap();
    ws.open_report(t0).unwrap().unwrap();

    ws.poll(ms(t0, 60_000), &mut rng);
    let progress = ws.xai().progress().unwrap();
    assert_eq!(progress.percent(), SIMULATED_CEILING);
    assert_eq!(progress.stage(), Stage::Finalizing);
    assert!(ws.is_loading());
}

#[test]
fn new_request_resets_progress() {
    let backend = FakeBackend::default();
    let mut ws = Workspace::new(settings());
    let mut rng = StdRng::seed_from_u64(2);
    let t0 = Instant::now();

    ws.submit(&backend, input("PID-111")).unwrap();
    let ticket = ws.open_report(t0).unwrap().unwrap();
    ws.settle(ticket.run(&backend), ms(t0, 100));
    ws.poll(ms(t0, 2000), &mut rng);
    assert_eq!(ws.xai().progress().unwrap().percent(), 100.0);

    ws.back_to_form();
    ws.submit(&backend, input("PID-222")).unwrap();
    assert_eq!(ws.xai(), &XaiPhase::Idle);
    ws.open_report(ms(t0, 3000)).unwrap().unwrap();
    assert_eq!(ws.xai().progress().unwrap().percent(), 0.0);
}

#[test]
fn disabled_simulation_applies_results_immediately() {
    let backend = FakeBackend::default();
    let mut ws = Workspace::new(ProgressSettings {
        enabled: false,
        ..settings()
    });
    let t0 = Instant::now();
    ws.submit(&backend, input("PID-111")).unwrap();
    let ticket = ws.open_report(t0).unwrap().unwrap();
    assert!(!ws.xai().progress().unwrap().is_timer_active());

    ws.settle(ticket.run(&backend), ms(t0, 10));
    assert!(!ws.is_loading());
    assert!(ws.report().unwrap().has_explanations());
}

// ---------------------------------------------------------------------------
// Superseded results
// ---------------------------------------------------------------------------

#[test]
fn stale_settlement_is_discarded() {
    let backend = FakeBackend::default();
    let mut ws = Workspace::new(settings());
    let t0 = Instant::now();

    ws.submit(&backend, input("PID-111")).unwrap();
    let old_ticket = ws.open_report(t0).unwrap().unwrap();
    let old_preview = ws.report().unwrap().image_preview_url.clone();

    ws.back_to_form();
    ws.submit(&backend, input("PID-222")).unwrap();
    assert!(ws.previews().get(&old_preview).is_none(), "old preview revoked");
    assert_eq!(ws.previews().len(), 1);

    let old = old_ticket.run(&backend);
    assert!(!ws.settle(old, ms(t0, 2000)));
    assert_eq!(ws.report().unwrap().patient_id, "PID-222");
    assert!(!ws.report().unwrap().has_explanations());
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[test]
fn history_passes_query_and_returns_to_origin() {
    let backend = FakeBackend {
        history: Ok(HistoryResponse {
            reports: vec![HistoryRecord {
                report_id: Some("r1".to_string()),
                patient_id: Some("PID-111".to_string()),
                ..Default::default()
            }],
        }),
        ..FakeBackend::default()
    };
    let mut ws = Workspace::default();
    ws.submit(&backend, input("PID-111")).unwrap();

    ws.open_history(&backend, "PID-111");
    assert_eq!(ws.page(), Page::History);
    assert_eq!(ws.history().records.len(), 1);

    ws.search_history(&backend, "");
    assert!(ws.select_history_record("r1"));
    assert!(ws.history().selected().is_some());

    ws.close_history();
    assert_eq!(ws.page(), Page::Analysis);
    assert!(ws.history().selected().is_none());
    assert_eq!(
        backend.calls()[1..],
        [Call::History("PID-111".to_string()), Call::History(String::new())]
    );
}

#[test]
fn history_error_is_shown_on_history_page() {
    let backend = FakeBackend {
        history: Err(ApiError::from_status(503, "")),
        ..FakeBackend::default()
    };
    let mut ws = Workspace::default();
    ws.open_history(&backend, "PID-111");

    assert_eq!(ws.page(), Page::History);
    assert_eq!(
        ws.history().error.as_deref(),
        Some("Request failed with status 503")
    );
    assert!(ws.history().records.is_empty());

    ws.close_history();
    assert_eq!(ws.page(), Page::Form);
}

#[test]
fn shutdown_revokes_previews() {
    let backend = FakeBackend::default();
    let mut ws = Workspace::default();
    ws.submit(&backend, input("PID-111")).unwrap();
    assert_eq!(ws.previews().len(), 1);

    ws.shutdown();
    assert!(ws.previews().is_empty());
}
