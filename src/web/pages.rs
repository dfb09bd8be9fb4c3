//! HTML rendering of the four workspace pages.
//!
//! Pages are pure functions of [`Workspace`] state; every action is a plain
//! HTML form posting back to the server.

use std::fmt::Write as _;

use crate::model::{Gender, HistoryRecord, Report, format_confidence};
use crate::workspace::history::HistoryView;
use crate::workspace::progress::Progress;
use crate::workspace::{Page, Workspace, XaiPhase};

use super::frontend;

/// Render whichever page the workspace is on.
pub fn render(ws: &Workspace, tick_ms: u64) -> String {
    let banner = ws
        .banner()
        .map(|msg| format!(r#"<div class="banner" role="alert">{}</div>"#, escape(msg)))
        .unwrap_or_default();

    match ws.page() {
        Page::Form => frontend::layout("Intake", &format!("{banner}{}", form_page(ws)), ""),
        Page::Analysis => frontend::layout("Analysis", &format!("{banner}{}", analysis_page(ws)), ""),
        Page::Xai => {
            let script = if ws.is_loading() {
                frontend::progress_poller(tick_ms)
            } else {
                String::new()
            };
            frontend::layout("XAI report", &format!("{banner}{}", xai_page(ws)), &script)
        }
        Page::History => frontend::layout("History", &format!("{banner}{}", history_page(ws.history())), ""),
    }
}

// ---------------------------------------------------------------------------
// Form
// ---------------------------------------------------------------------------

fn form_page(ws: &Workspace) -> String {
    let draft = ws.draft();
    let mut gender_options = String::from(r#"<option value="">Select...</option>"#);
    for gender in Gender::ALL {
        let selected = if draft.gender == gender.as_str() { " selected" } else { "" };
        let _ = write!(gender_options, r#"<option{selected}>{gender}</option>"#);
    }

    let back = if ws.report().is_some() {
        r#"<form method="post" action="/nav/analysis"><button class="btn btn-ghost" type="submit">Back to last analysis</button></form>"#
    } else {
        ""
    };

    format!(
        r#"<div class="grid">
<div class="card">
  <h2>Patient intake</h2>
  <form id="intake-form" method="post" action="/submit" enctype="multipart/form-data">
    <label>Patient name<input name="patientName" value="{name}" required></label>
    <label>Patient ID<input name="patientId" value="{id}" required></label>
    <label>Age<input name="patientAge" type="number" min="0" step="1" value="{age}" required></label>
    <label>Gender<select name="patientGender" required>{gender_options}</select></label>
    <label>Chest X-ray<input name="file" type="file" accept="image/*" required></label>
    <div class="actions"><button class="btn" type="submit">Analyze scan</button></div>
  </form>
  <div class="actions">{back}</div>
</div>
<div class="card preview">
  <h2>Preview</h2>
  <img id="local-preview" alt="Selected X-ray" hidden>
  <p class="muted">The image is previewed locally and only uploaded on submit.</p>
</div>
</div>"#,
        name = escape(&draft.patient_name),
        id = escape(&draft.patient_id),
        age = escape(&draft.age),
    )
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

fn analysis_page(ws: &Workspace) -> String {
    let Some(report) = ws.report() else {
        return r#"<div class="card"><p class="muted">No prediction yet.</p></div>"#.to_string();
    };

    let mut summary = String::new();
    for line in &report.summary {
        let _ = write!(summary, "<li>{}</li>", escape(line));
    }

    let cta = if ws.is_loading() {
        "View XAI report (generating...)"
    } else if report.has_explanations() {
        "View XAI report"
    } else {
        "Generate XAI report"
    };

    format!(
        r#"<div class="grid">
<div class="card">
  <h2>Diagnosis</h2>
  {diagnosis}
  <p class="confidence">{confidence} confidence</p>
  <ul class="summary">{summary}</ul>
  <div class="actions">
    <form class="once" method="post" action="/report"><button class="btn" type="submit">{cta}</button></form>
    <form method="post" action="/nav/form"><button class="btn btn-ghost" type="submit">New scan</button></form>
    <a class="btn btn-ghost" href="/history?patientId={id_query}">History for this patient</a>
  </div>
</div>
<div class="card preview">
  <h2>{file_name}</h2>
  {patient}
  <img src="{preview}" alt="Submitted X-ray">
</div>
</div>"#,
        diagnosis = diagnosis_html(report),
        confidence = escape(&report.confidence_display()),
        id_query = urlencoding::encode(&report.patient_id),
        file_name = escape(&report.file_name),
        patient = patient_html(report),
        preview = escape(&report.image_preview_url),
    )
}

fn diagnosis_html(report: &Report) -> String {
    let class = if report.is_normal() { "normal" } else { "abnormal" };
    format!(r#"<p class="diagnosis {class}">{}</p>"#, escape(&report.diagnosis))
}

fn patient_html(report: &Report) -> String {
    format!(
        r#"<p class="muted">{} · {} · {} years · {}</p>"#,
        escape(&report.patient_name),
        escape(&report.patient_id),
        report.age,
        report.gender
    )
}

// ---------------------------------------------------------------------------
// XAI report
// ---------------------------------------------------------------------------

fn xai_page(ws: &Workspace) -> String {
    let Some(report) = ws.report() else {
        return r#"<div class="card"><p class="muted">No prediction yet.</p></div>"#.to_string();
    };

    let status = match ws.xai() {
        XaiPhase::Idle => String::new(),
        XaiPhase::Loading { progress, .. } => loading_html(progress),
        XaiPhase::Failed { message, .. } => format!(
            r#"<div class="banner" role="alert">{}</div>
<form class="once" method="post" action="/report/retry"><button class="btn" type="submit">Retry</button></form>"#,
            escape(message)
        ),
        XaiPhase::Ready { .. } => images_html(report),
    };

    format!(
        r#"<div class="card">
  <h2>Explainability report</h2>
  {patient}
  {diagnosis}
  <p class="confidence">{confidence} confidence</p>
</div>
<div class="card">{status}</div>
<div class="actions">
  <form method="post" action="/nav/analysis"><button class="btn btn-ghost" type="submit">Back to analysis</button></form>
  <form method="post" action="/nav/form"><button class="btn btn-ghost" type="submit">New scan</button></form>
</div>"#,
        patient = patient_html(report),
        diagnosis = diagnosis_html(report),
        confidence = escape(&report.confidence_display()),
    )
}

fn loading_html(progress: &Progress) -> String {
    if !progress.is_timer_active() && progress.percent() == 0.0 {
        return r#"<h2>Generating XAI report...</h2><p class="muted">This can take a minute.</p>"#.to_string();
    }
    let pct = progress.percent().round();
    format!(
        r#"<h2>Generating XAI report</h2>
<div class="progress-track"><div id="progress-fill" class="progress-fill" style="width: {pct}%"></div></div>
<div class="progress-meta">
  <span id="progress-stage">{stage}</span>
  <span><span id="progress-steps">{done}/{total} steps</span> · <span id="progress-pct">{pct}%</span></span>
</div>"#,
        stage = progress.stage().label(),
        done = progress.completed_steps(),
        total = progress.total_steps(),
    )
}

fn images_html(report: &Report) -> String {
    let mut cells = String::new();
    for (name, source) in report.explanation_images() {
        let _ = write!(cells, r#"<div class="xai-image"><h2>{name}</h2>{}</div>"#, image_or_missing(name, source));
    }
    let generated = report
        .generated_at
        .map(|at| format!(r#"<p class="muted">Generated at {}</p>"#, at.format("%Y-%m-%d %H:%M:%S")))
        .unwrap_or_default();
    format!(r#"<div class="grid-3">{cells}</div>{generated}"#)
}

fn image_or_missing(name: &str, source: Option<&str>) -> String {
    match source.filter(|s| !s.is_empty()) {
        Some(src) => format!(r#"<img src="{}" alt="{name}">"#, escape(src)),
        None => r#"<div class="missing muted">Not provided</div>"#.to_string(),
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

fn history_page(view: &HistoryView) -> String {
    let mut body = format!(
        r#"<div class="card">
  <form method="get" action="/history" class="actions">
    <input name="patientId" placeholder="Patient ID (empty for all)" value="{}">
    <button class="btn" type="submit">Search</button>
  </form>
  <div class="actions"><form method="post" action="/history/close"><button class="btn btn-ghost" type="submit">Close history</button></form></div>
</div>"#,
        escape(&view.query)
    );

    if let Some(message) = &view.error {
        let _ = write!(body, r#"<div class="banner" role="alert">{}</div>"#, escape(message));
    } else if view.records.is_empty() {
        body.push_str(r#"<div class="card"><p class="muted">No reports found.</p></div>"#);
    } else {
        body.push_str(&records_table(&view.records));
    }

    if let Some(record) = view.selected() {
        body.push_str(&record_modal(record));
    }
    body
}

fn records_table(records: &[HistoryRecord]) -> String {
    let mut rows = String::new();
    for record in records {
        let _ = write!(
            rows,
            r#"<tr><td>{name}</td><td>{id}</td><td>{age}</td><td>{gender}</td><td>{diagnosis}</td><td>{confidence}</td><td>{created}</td><td>{badge}</td><td><a class="btn btn-ghost" href="/history/view?key={key}">View</a></td></tr>"#,
            name = escape(record.patient_name.as_deref().unwrap_or("-")),
            id = escape(record.patient_id.as_deref().unwrap_or("-")),
            age = escape(record.patient_age.as_deref().unwrap_or("-")),
            gender = escape(record.patient_gender.as_deref().unwrap_or("-")),
            diagnosis = escape(record.diagnosis_display()),
            confidence = escape(&record.confidence_display()),
            created = escape(&record.created_display()),
            badge = xai_badge(record),
            key = urlencoding::encode(&record.key()),
        );
    }
    format!(
        r#"<div class="card"><table>
<thead><tr><th>Name</th><th>ID</th><th>Age</th><th>Gender</th><th>Diagnosis</th><th>Confidence</th><th>Created</th><th>XAI</th><th></th></tr></thead>
<tbody>{rows}</tbody>
</table></div>"#
    )
}

fn xai_badge(record: &HistoryRecord) -> &'static str {
    if record.has_explanations() {
        r#"<span class="badge ok">XAI available</span>"#
    } else {
        r#"<span class="badge pending">XAI pending</span>"#
    }
}

fn record_modal(record: &HistoryRecord) -> String {
    let source = record
        .source_image_url
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|src| format!(r#"<img src="{}" alt="Original X-ray">"#, escape(src)))
        .unwrap_or_else(|| r#"<p class="muted">Original image not available</p>"#.to_string());

    let mut images = String::new();
    for (name, src) in [
        ("Grad-CAM", record.gradcam.as_deref()),
        ("LIME", record.lime.as_deref()),
        ("Occlusion", record.occlusion.as_deref()),
    ] {
        let _ = write!(images, r#"<div class="xai-image"><h2>{name}</h2>{}</div>"#, image_or_missing(name, src));
    }

    format!(
        r#"<div class="modal-backdrop"><div class="modal" role="dialog" aria-modal="true">
  <h2>{name} · {id}</h2>
  <p class="muted">{diagnosis} · {confidence} · {created}</p>
  <div class="preview">{source}</div>
  <div class="grid-3">{images}</div>
  <div class="actions"><form method="post" action="/history/modal/close"><button class="btn" type="submit">Close</button></form></div>
</div></div>"#,
        name = escape(record.patient_name.as_deref().unwrap_or("Unknown patient")),
        id = escape(record.patient_id.as_deref().unwrap_or("-")),
        diagnosis = escape(record.diagnosis_display()),
        confidence = escape(&format_confidence(record.confidence.unwrap_or(0.0))),
        created = escape(&record.created_display()),
    )
}

// ---------------------------------------------------------------------------
// Escaping
// ---------------------------------------------------------------------------

/// Escape text for HTML element content and double-quoted attributes.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
