//! The page-state machine behind both the CLI and the web workspace.
//!
//! ```text
//!   form ──submit ok──▶ analysis ──open report──▶ xai
//!    ▲                     ▲  │                    │
//!    └──── back to form ───┴──┼──── back ──────────┘
//!                             ▼
//!   history (from any page; closing returns to the page it was opened from)
//! ```
//!
//! [`Workspace`] is the only writer of its state. Network calls are made by
//! the caller through a [`DiagnosisBackend`]: prediction and history calls
//! run inline, while the explanation call is split into
//! [`Workspace::open_report`] (returns an [`ExplainTicket`]) and
//! [`Workspace::settle`] so it can run on another thread. A settlement for a
//! superseded submission is discarded.

pub mod history;
pub mod preview;
pub mod progress;

use std::time::Instant;

use chrono::Local;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;

use crate::api::{ApiError, DiagnosisBackend};
use crate::form::{FormInput, ValidationError};
use crate::model::{Explanation, Report, SubmissionPayload};

use history::HistoryView;
use preview::PreviewStore;
use progress::{Progress, ProgressSettings, Stage};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// The four pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Page {
    Form,
    Analysis,
    Xai,
    History,
}

/// Everything a workspace action can fail with. `Display` is the text shown
/// to the user.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkspaceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("{0}")]
    Precondition(&'static str),

    #[error("An explanation request is already in progress.")]
    Busy,
}

/// Status of the explanation report for the current submission.
#[derive(Debug, Clone, PartialEq)]
pub enum XaiPhase {
    /// No explanation requested yet.
    Idle,
    /// Request outstanding, or settled but still inside the minimum visible
    /// duration.
    Loading {
        generation: u64,
        progress: Progress,
        settled: Option<Result<Explanation, ApiError>>,
    },
    /// Explanation merged into the report.
    Ready { progress: Progress },
    /// The request failed; [`Workspace::retry_explanation`] repeats it.
    Failed { progress: Progress, message: String },
}

impl XaiPhase {
    pub fn progress(&self) -> Option<&Progress> {
        match self {
            Self::Idle => None,
            Self::Loading { progress, .. } | Self::Ready { progress } | Self::Failed { progress, .. } => {
                Some(progress)
            }
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// An explanation call to perform on behalf of the workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainTicket {
    generation: u64,
    payload: SubmissionPayload,
}

impl ExplainTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn payload(&self) -> &SubmissionPayload {
        &self.payload
    }

    /// Perform the call. Safe to run on any thread.
    pub fn run(self, backend: &dyn DiagnosisBackend) -> Settlement {
        Settlement {
            generation: self.generation,
            result: backend.submit_explanation(&self.payload),
        }
    }
}

/// The outcome of an [`ExplainTicket`], fed back through [`Workspace::settle`].
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub generation: u64,
    pub result: Result<Explanation, ApiError>,
}

/// The payload and report of the current submission.
#[derive(Debug, Clone, PartialEq)]
struct Session {
    generation: u64,
    payload: SubmissionPayload,
    report: Report,
}

/// JSON view of the workspace for `GET /api/state`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot<'a> {
    pub page: Page,
    pub banner: Option<&'a str>,
    pub loading: bool,
    pub progress: Option<f64>,
    pub stage: Option<Stage>,
    pub stage_label: Option<&'static str>,
    pub completed_steps: Option<u32>,
    pub total_steps: Option<u32>,
    pub xai_error: Option<&'a str>,
    pub report: Option<&'a Report>,
    pub history: &'a HistoryView,
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Workspace {
    page: Page,
    history_return: Page,
    session: Option<Session>,
    draft: FormInput,
    banner: Option<String>,
    xai: XaiPhase,
    history: HistoryView,
    previews: PreviewStore,
    settings: ProgressSettings,
    next_generation: u64,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new(ProgressSettings::default())
    }
}

impl Workspace {
    pub fn new(settings: ProgressSettings) -> Self {
        Self {
            page: Page::Form,
            history_return: Page::Form,
            session: None,
            draft: FormInput::default(),
            banner: None,
            xai: XaiPhase::Idle,
            history: HistoryView::default(),
            previews: PreviewStore::default(),
            settings,
            next_generation: 0,
        }
    }

    // -- Accessors --

    pub fn page(&self) -> Page {
        self.page
    }

    pub fn report(&self) -> Option<&Report> {
        self.session.as_ref().map(|s| &s.report)
    }

    /// The last successfully submitted payload.
    pub fn payload(&self) -> Option<&SubmissionPayload> {
        self.session.as_ref().map(|s| &s.payload)
    }

    /// Values of the last form submission, for re-rendering the form.
    pub fn draft(&self) -> &FormInput {
        &self.draft
    }

    /// Page-level error message.
    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn xai(&self) -> &XaiPhase {
        &self.xai
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.xai, XaiPhase::Loading { .. })
    }

    pub fn history(&self) -> &HistoryView {
        &self.history
    }

    pub fn previews(&self) -> &PreviewStore {
        &self.previews
    }

    pub fn snapshot(&self) -> Snapshot<'_> {
        let progress = self.xai.progress();
        Snapshot {
            page: self.page,
            banner: self.banner(),
            loading: self.is_loading(),
            progress: progress.map(Progress::percent),
            stage: progress.map(Progress::stage),
            stage_label: progress.map(|p| p.stage().label()),
            completed_steps: progress.map(Progress::completed_steps),
            total_steps: progress.map(Progress::total_steps),
            xai_error: self.xai.error(),
            report: self.report(),
            history: &self.history,
        }
    }

    // -- Form --

    /// Validate the form and submit it for prediction.
    ///
    /// On success the previous submission (report, preview, any pending
    /// explanation) is replaced and the page moves to analysis. On failure
    /// the page stays on the form and the current report is untouched.
    pub fn submit(&mut self, backend: &dyn DiagnosisBackend, input: FormInput) -> Result<(), WorkspaceError> {
        if self.page != Page::Form {
            return self.reject(WorkspaceError::Precondition(
                "Return to the intake form to submit a new scan.",
            ));
        }
        self.banner = None;
        self.draft = FormInput { file: None, ..input.clone() };

        let mut payload = match input.validate() {
            Ok(payload) => payload,
            Err(e) => return self.reject(e.into()),
        };
        let prediction = match backend.submit_prediction(&payload) {
            Ok(prediction) => prediction,
            Err(e) => return self.reject(e.into()),
        };

        if let Some(old) = self.session.take() {
            self.previews.revoke(&old.payload.preview_url);
        }
        payload.preview_url = self.previews.create(&payload.file);

        self.next_generation += 1;
        self.session = Some(Session {
            generation: self.next_generation,
            report: Report::from_prediction(&payload, &prediction),
            payload,
        });
        self.xai = XaiPhase::Idle;
        self.page = Page::Analysis;
        Ok(())
    }

    // -- XAI report --

    /// Move to the XAI page and start the explanation call.
    ///
    /// Returns `Ok(None)` when there is nothing to send: the report already
    /// has its explanation or a request is already outstanding. Without a
    /// successful prediction holding an image, nothing is sent and a
    /// precondition error is raised.
    pub fn open_report(&mut self, now: Instant) -> Result<Option<ExplainTicket>, WorkspaceError> {
        let Some(session) = &self.session else {
            return self.reject(WorkspaceError::Precondition(
                "Submit a prediction before generating the XAI report.",
            ));
        };
        if !session.payload.has_file() {
            return self.reject(WorkspaceError::Precondition(
                "The original X-ray is no longer available. Submit the form again.",
            ));
        }

        self.banner = None;
        self.page = Page::Xai;
        match self.xai {
            XaiPhase::Loading { .. } | XaiPhase::Ready { .. } => Ok(None),
            XaiPhase::Idle | XaiPhase::Failed { .. } => Ok(self.begin_explanation(now)),
        }
    }

    /// Repeat a failed explanation call with the same payload.
    pub fn retry_explanation(&mut self, now: Instant) -> Result<ExplainTicket, WorkspaceError> {
        match self.xai {
            XaiPhase::Loading { .. } => Err(WorkspaceError::Busy),
            XaiPhase::Failed { .. } => self
                .begin_explanation(now)
                .ok_or(WorkspaceError::Precondition("There is no failed XAI report to retry.")),
            XaiPhase::Idle | XaiPhase::Ready { .. } => {
                Err(WorkspaceError::Precondition("There is no failed XAI report to retry."))
            }
        }
    }

    fn begin_explanation(&mut self, now: Instant) -> Option<ExplainTicket> {
        let session = self.session.as_ref()?;
        let ticket = ExplainTicket {
            generation: session.generation,
            payload: session.payload.clone(),
        };
        self.xai = XaiPhase::Loading {
            generation: session.generation,
            progress: Progress::start(now, self.settings),
            settled: None,
        };
        Some(ticket)
    }

    /// Record the outcome of an explanation call.
    ///
    /// The progress ticker stops immediately. The result itself is applied
    /// once the minimum visible duration has passed (see [`poll`](Self::poll)).
    /// Returns `false` when the settlement belongs to a superseded request
    /// and was discarded.
    pub fn settle(&mut self, settlement: Settlement, now: Instant) -> bool {
        match &mut self.xai {
            XaiPhase::Loading {
                generation,
                progress,
                settled,
            } if *generation == settlement.generation && settled.is_none() => {
                progress.stop();
                *settled = Some(settlement.result);
            }
            _ => return false,
        }
        self.finish_if_due(now);
        true
    }

    /// Advance the progress simulation and apply a settled result whose
    /// minimum visible duration has elapsed.
    pub fn poll<R: Rng + ?Sized>(&mut self, now: Instant, rng: &mut R) {
        if let XaiPhase::Loading {
            progress,
            settled: None,
            ..
        } = &mut self.xai
        {
            progress.advance(now, rng);
        }
        self.finish_if_due(now);
    }

    fn finish_if_due(&mut self, now: Instant) {
        let due = match &self.xai {
            XaiPhase::Loading {
                progress,
                settled: Some(_),
                ..
            } => now >= progress.visible_until(),
            _ => false,
        };
        if !due {
            return;
        }

        let XaiPhase::Loading {
            mut progress,
            settled: Some(result),
            ..
        } = std::mem::replace(&mut self.xai, XaiPhase::Idle)
        else {
            return;
        };

        self.xai = match result {
            Ok(explanation) => {
                if let Some(session) = self.session.as_mut() {
                    session.report.apply_explanation(&explanation, Local::now());
                }
                progress.complete();
                XaiPhase::Ready { progress }
            }
            Err(e) => XaiPhase::Failed {
                progress,
                message: e.to_string(),
            },
        };
    }

    // -- Navigation --

    pub fn back_to_form(&mut self) {
        self.banner = None;
        self.page = Page::Form;
    }

    pub fn back_to_analysis(&mut self) -> Result<(), WorkspaceError> {
        if self.session.is_none() {
            return self.reject(WorkspaceError::Precondition("There is no prediction to show yet."));
        }
        self.banner = None;
        self.page = Page::Analysis;
        Ok(())
    }

    // -- History --

    /// Enter the history page and search for `patient_id` (empty = all).
    pub fn open_history(&mut self, backend: &dyn DiagnosisBackend, patient_id: &str) {
        if self.page != Page::History {
            self.history_return = self.page;
        }
        self.banner = None;
        self.page = Page::History;
        self.history.close_preview();
        self.search_history(backend, patient_id);
    }

    /// Run a history search. The query is passed to the backend as typed.
    pub fn search_history(&mut self, backend: &dyn DiagnosisBackend, patient_id: &str) {
        self.history.query = patient_id.to_string();
        match backend.fetch_history(patient_id) {
            Ok(response) => self.history.set_results(response.reports),
            Err(e) => self.history.set_error(e.to_string()),
        }
    }

    /// Leave history for the page it was opened from.
    pub fn close_history(&mut self) {
        if self.page == Page::History {
            self.history.close_preview();
            self.page = self.history_return;
        }
    }

    pub fn select_history_record(&mut self, key: &str) -> bool {
        self.history.select(key)
    }

    pub fn close_history_preview(&mut self) {
        self.history.close_preview();
    }

    /// Release every preview URL. Called when the workspace is torn down.
    pub fn shutdown(&mut self) {
        self.previews.revoke_all();
    }

    fn reject<T>(&mut self, err: WorkspaceError) -> Result<T, WorkspaceError> {
        self.banner = Some(err.to_string());
        Err(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::model::{HistoryResponse, ImageFile, Prediction};

    #[derive(Default)]
    struct CountingBackend {
        explain_calls: Cell<usize>,
    }

    impl DiagnosisBackend for CountingBackend {
        fn submit_prediction(&self, _: &SubmissionPayload) -> Result<Prediction, ApiError> {
            Ok(Prediction {
                label: "NORMAL".to_string(),
                confidence: 80.0,
            })
        }

        fn submit_explanation(&self, _: &SubmissionPayload) -> Result<Explanation, ApiError> {
            self.explain_calls.set(self.explain_calls.get() + 1);
            Err(ApiError::Transport("connection refused".to_string()))
        }

        fn fetch_history(&self, _: &str) -> Result<HistoryResponse, ApiError> {
            Ok(HistoryResponse::default())
        }
    }

    fn input() -> FormInput {
        FormInput {
            patient_name: "za".to_string(),
            patient_id: "PID-111".to_string(),
            age: "21".to_string(),
            gender: "Male".to_string(),
            file: Some(ImageFile::new("chest.png", "image/png", vec![1, 2, 3])),
        }
    }

    #[test]
    fn starts_on_form() {
        let ws = Workspace::default();
        assert_eq!(ws.page(), Page::Form);
        assert!(ws.report().is_none());
        assert!(!ws.is_loading());
    }

    #[test]
    fn failed_explanation_allows_retry_with_same_payload() {
        let backend = CountingBackend::default();
        let mut ws = Workspace::default();
        let t0 = Instant::now();
        ws.submit(&backend, input()).unwrap();

        let ticket = ws.open_report(t0).unwrap().unwrap();
        let settlement = ticket.run(&backend);
        assert!(ws.settle(settlement, t0 + Duration::from_secs(2)));
        assert_eq!(ws.xai().error(), Some("network error: connection refused"));
        assert_eq!(ws.page(), Page::Xai);

        let retry = ws.retry_explanation(t0 + Duration::from_secs(3)).unwrap();
        assert_eq!(retry.payload().patient_id, "PID-111");
        assert!(ws.is_loading());
        assert_eq!(ws.retry_explanation(t0), Err(WorkspaceError::Busy));
        assert_eq!(backend.explain_calls.get(), 1);
    }

    #[test]
    fn reopening_while_loading_sends_nothing() {
        let backend = CountingBackend::default();
        let mut ws = Workspace::default();
        let t0 = Instant::now();
        ws.submit(&backend, input()).unwrap();

        assert!(ws.open_report(t0).unwrap().is_some());
        ws.back_to_analysis().unwrap();
        assert!(ws.open_report(t0).unwrap().is_none());
        assert_eq!(ws.page(), Page::Xai);
    }

    #[test]
    fn poll_advances_only_while_outstanding() {
        let backend = CountingBackend::default();
        let mut ws = Workspace::default();
        let mut rng = StdRng::seed_from_u64(11);
        let t0 = Instant::now();
        ws.submit(&backend, input()).unwrap();
        ws.open_report(t0).unwrap();

        ws.poll(t0 + Duration::from_secs(1), &mut rng);
        let percent = ws.xai().progress().map(Progress::percent).unwrap();
        assert!(percent > 0.0);
    }

    #[test]
    fn submit_from_other_page_is_rejected() {
        let backend = CountingBackend::default();
        let mut ws = Workspace::default();
        ws.submit(&backend, input()).unwrap();
        let err = ws.submit(&backend, input()).unwrap_err();
        assert!(matches!(err, WorkspaceError::Precondition(_)));
        assert_eq!(ws.page(), Page::Analysis);
    }

    #[test]
    fn snapshot_serializes_page_and_report() {
        let backend = CountingBackend::default();
        let mut ws = Workspace::default();
        ws.submit(&backend, input()).unwrap();
        let json = serde_json::to_string(&ws.snapshot()).unwrap();
        assert!(json.contains("\"page\":\"analysis\""));
        assert!(json.contains("\"diagnosis\":\"NORMAL\""));
        assert!(json.contains("\"loading\":false"));
    }
}
