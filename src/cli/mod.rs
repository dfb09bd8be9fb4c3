//! CLI command implementations for pneumo.
//!
//! Provides subcommand handlers for:
//! - `pneumo predict` — submit a scan and print the diagnosis
//! - `pneumo explain` — predict, then generate the XAI report with a progress bar
//! - `pneumo history` — list past reports for a patient
//! - `pneumo health` — config files, backend reachability, request log
//! - `pneumo activity` — recent backend calls from the request log
//! - `pneumo config show|init|set|reset` — configuration management
//!
//! Every handler drives the same [`Workspace`] the web surface uses, so
//! validation, precondition checks and progress timing behave identically.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use colored::Colorize;

use crate::analytics::logger::{self, RequestLogEntry};
use crate::api::HttpBackend;
use crate::config::{self, PneumoConfig};
use crate::form::{self, FormInput};
use crate::model::{HistoryRecord, Report};
use crate::workspace::progress::{Progress, ProgressSettings};
use crate::workspace::{Workspace, XaiPhase};

/// Output format for report and log commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl OutputFormat {
    pub fn from_str_opt(s: Option<&str>) -> Self {
        match s {
            Some("json") => Self::Json,
            Some("csv") => Self::Csv,
            _ => Self::Table,
        }
    }
}

/// Assemble form input from command-line values, reading the image from disk.
///
/// The values are validated later by the workspace, exactly like a web
/// form submission.
pub fn form_input(image: &Path, name: &str, id: &str, age: &str, gender: &str) -> Result<FormInput> {
    Ok(FormInput {
        patient_name: name.to_string(),
        patient_id: id.to_string(),
        age: age.to_string(),
        gender: gender.to_string(),
        file: Some(form::load_image(image)?),
    })
}

fn workspace_for(cfg: &PneumoConfig) -> Workspace {
    Workspace::new(ProgressSettings::from(&cfg.progress))
}

// ---------------------------------------------------------------------------
// pneumo predict
// ---------------------------------------------------------------------------

/// Submit a scan for prediction and print the diagnosis.
pub fn run_predict(input: FormInput, format: OutputFormat) -> Result<()> {
    let cfg = config::load();
    let backend = HttpBackend::from_config(&cfg);
    let mut ws = workspace_for(&cfg);

    ws.submit(&backend, input).context("prediction failed")?;
    let report = ws.report().context("prediction produced no report")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Csv => print_report_csv(report),
        OutputFormat::Table => print_report_table(report),
    }

    ws.shutdown();
    Ok(())
}

// ---------------------------------------------------------------------------
// pneumo explain
// ---------------------------------------------------------------------------

/// Predict, then request the explainability report.
///
/// The `/explain` call runs on a worker thread while this thread ticks the
/// progress simulation and redraws the bar on stderr. With `save_dir`, inline
/// data-URI images are decoded and written to that directory.
pub fn run_explain(input: FormInput, save_dir: Option<&Path>, format: OutputFormat) -> Result<()> {
    let cfg = config::load();
    let settings = ProgressSettings::from(&cfg.progress);
    let backend = HttpBackend::from_config(&cfg);
    let mut ws = workspace_for(&cfg);

    ws.submit(&backend, input).context("prediction failed")?;
    if let Some(report) = ws.report()
        && format == OutputFormat::Table
    {
        println!(
            "  {} {} ({})",
            "Prediction:".bold(),
            colorize_diagnosis(report),
            report.confidence_display()
        );
    }

    let ticket = ws
        .open_report(Instant::now())?
        .context("no explanation request was started")?;

    let (tx, rx) = mpsc::channel();
    let worker_backend = backend.clone();
    thread::spawn(move || {
        let _ = tx.send(ticket.run(&worker_backend));
    });

    if !settings.enabled {
        eprintln!("{}", "Generating XAI report...".dimmed());
    }

    let mut rng = rand::rng();
    let mut received = false;
    while ws.is_loading() {
        if received {
            thread::sleep(settings.tick);
        } else {
            match rx.recv_timeout(settings.tick) {
                Ok(settlement) => {
                    received = true;
                    ws.settle(settlement, Instant::now());
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    anyhow::bail!("explanation worker stopped without a result")
                }
            }
        }
        ws.poll(Instant::now(), &mut rng);
        if settings.enabled
            && let Some(progress) = ws.xai().progress()
        {
            draw_progress(progress);
        }
    }
    if settings.enabled {
        eprintln!();
    }

    if let XaiPhase::Failed { message, .. } = ws.xai() {
        anyhow::bail!("XAI report failed: {message}");
    }
    let report = ws.report().context("explanation produced no report")?;

    let saved = match save_dir {
        Some(dir) => save_explanation_images(report, dir)?,
        None => Vec::new(),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Csv => print_report_csv(report),
        OutputFormat::Table => {
            print_report_table(report);
            print_explanation_images(report, &saved);
        }
    }

    ws.shutdown();
    Ok(())
}

fn draw_progress(progress: &Progress) {
    eprint!(
        "\r  {} {:>3.0}%  {}/{} steps  {:<40}",
        render_bar(progress.percent(), 30),
        progress.percent(),
        progress.completed_steps(),
        progress.total_steps(),
        progress.stage().label().dimmed(),
    );
}

/// A fixed-width text progress bar.
fn render_bar(percent: f64, width: usize) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

// ---------------------------------------------------------------------------
// Explanation images
// ---------------------------------------------------------------------------

/// Split a `data:<mime>;base64,<payload>` URI into its MIME type and bytes.
///
/// Returns `None` for plain URLs and for URIs that are not base64 encoded.
fn decode_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let rest = uri.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64")?;
    let bytes = STANDARD.decode(payload.trim()).ok()?;
    Some((mime.to_string(), bytes))
}

fn image_slug(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// File-name prefix for a patient ID. Path separators and dots are dropped so
/// the file always lands directly inside the target directory.
fn patient_file_stem(patient_id: &str) -> String {
    let stem: String = patient_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect();
    if stem.is_empty() { "patient".to_string() } else { stem }
}

/// Write each inline explanation image to `dir`. Images given as plain URLs
/// are left alone.
fn save_explanation_images(report: &Report, dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let mut saved = Vec::new();
    for (name, source) in report.explanation_images() {
        let Some((mime, bytes)) = source.and_then(decode_data_uri) else {
            continue;
        };
        let ext = mime_guess::get_mime_extensions_str(&mime)
            .and_then(|exts| exts.first())
            .copied()
            .unwrap_or("bin");
        let path = dir.join(format!("{}-{}.{ext}", patient_file_stem(&report.patient_id), image_slug(name)));
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        saved.push((name.to_string(), path));
    }
    Ok(saved)
}

fn print_explanation_images(report: &Report, saved: &[(String, PathBuf)]) {
    println!();
    println!("{}", "Explainability Maps".bold().cyan());
    for (name, source) in report.explanation_images() {
        let detail = match (source, saved.iter().find(|(n, _)| n == name)) {
            (_, Some((_, path))) => format!("saved to {}", path.display()),
            (Some(uri), None) if uri.starts_with("data:") => {
                format!("inline image ({} chars, use --save-dir to write it)", uri.len())
            }
            (Some(url), None) => url.to_string(),
            (None, None) => "not provided".to_string(),
        };
        print_health_item(name, source.is_some(), &detail);
    }
    if let Some(at) = report.generated_at {
        println!(
            "  {} {}",
            "Generated at:".dimmed(),
            at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
    }
}

// ---------------------------------------------------------------------------
// Report output
// ---------------------------------------------------------------------------

fn print_report_table(report: &Report) {
    println!("{}", "Diagnosis Summary".bold().cyan());
    println!("{}", "=".repeat(50));
    println!("  {} {}", "Patient:   ".bold(), report.patient_name);
    println!("  {} {}", "Patient ID:".bold(), report.patient_id);
    println!("  {} {} / {}", "Age/Gender:".bold(), report.age, report.gender);
    println!("  {} {}", "Image:     ".bold(), report.file_name);
    println!("  {} {}", "Diagnosis: ".bold(), colorize_diagnosis(report));
    println!("  {} {}", "Confidence:".bold(), report.confidence_display());
    println!();
    for line in &report.summary {
        println!("  {} {}", "·".dimmed(), line);
    }
}

fn print_report_csv(report: &Report) {
    println!("patient_name,patient_id,age,gender,file_name,diagnosis,confidence,has_explanations");
    println!(
        "{},{},{},{},{},{},{},{}",
        csv_field(&report.patient_name),
        csv_field(&report.patient_id),
        report.age,
        report.gender,
        csv_field(&report.file_name),
        csv_field(&report.diagnosis),
        report.confidence,
        report.has_explanations(),
    );
}

fn colorize_diagnosis(report: &Report) -> colored::ColoredString {
    if report.is_normal() {
        report.diagnosis.green().bold()
    } else {
        report.diagnosis.red().bold()
    }
}

// ---------------------------------------------------------------------------
// pneumo history
// ---------------------------------------------------------------------------

/// List past reports. An empty `patient_id` lists every patient.
pub fn run_history(patient_id: &str, format: OutputFormat) -> Result<()> {
    let cfg = config::load();
    let backend = HttpBackend::from_config(&cfg);
    let mut ws = workspace_for(&cfg);

    ws.open_history(&backend, patient_id);
    let view = ws.history();
    if let Some(message) = &view.error {
        anyhow::bail!("history lookup failed: {message}");
    }

    if view.records.is_empty() {
        let scope = if patient_id.is_empty() {
            "No reports found.".to_string()
        } else {
            format!("No reports found for patient {patient_id}.")
        };
        println!("{}", scope.yellow());
        return Ok(());
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&view.records)?),
        OutputFormat::Csv => print_history_csv(&view.records),
        OutputFormat::Table => print_history_table(&view.records),
    }
    Ok(())
}

fn print_history_table(records: &[HistoryRecord]) {
    println!("{}", "Patient History".bold().cyan());
    println!("{}", "=".repeat(86));
    println!(
        "  {:<12} {:<18} {:<12} {:>10} {:<20} XAI",
        "Patient ID", "Name", "Diagnosis", "Confidence", "Created"
    );
    println!("  {}", "-".repeat(84));

    for (i, record) in records.iter().enumerate() {
        let badge = if record.has_explanations() {
            "available".green()
        } else {
            "pending".yellow()
        };
        let line = format!(
            "  {:<12} {:<18} {:<12} {:>10} {:<20}",
            truncate(record.patient_id.as_deref().unwrap_or("-"), 12),
            truncate(record.patient_name.as_deref().unwrap_or("-"), 18),
            truncate(record.diagnosis_display(), 12),
            record.confidence_display(),
            record.created_display(),
        );
        if i % 2 == 0 {
            println!("{line} {badge}");
        } else {
            println!("{} {badge}", line.dimmed());
        }
    }
    println!();
    println!("  {} {}", "Total:".dimmed(), format_number(records.len()));
}

fn print_history_csv(records: &[HistoryRecord]) {
    println!("key,patient_id,patient_name,diagnosis,confidence,created_at,xai_available");
    for record in records {
        println!(
            "{},{},{},{},{},{},{}",
            csv_field(&record.key()),
            csv_field(record.patient_id.as_deref().unwrap_or("")),
            csv_field(record.patient_name.as_deref().unwrap_or("")),
            csv_field(record.diagnosis.as_deref().unwrap_or("")),
            record.confidence.map(|c| c.to_string()).unwrap_or_default(),
            csv_field(record.created_at.as_deref().unwrap_or("")),
            record.has_explanations(),
        );
    }
}

// ---------------------------------------------------------------------------
// pneumo activity
// ---------------------------------------------------------------------------

/// Show the most recent backend calls from the request log.
pub fn run_activity(limit: usize, format: OutputFormat) -> Result<()> {
    let entries = logger::read_recent(limit);

    if entries.is_empty() {
        println!(
            "{}",
            "No requests logged yet. Run `pneumo predict` or `pneumo web` first.".yellow()
        );
        return Ok(());
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Csv => print_activity_csv(&entries),
        OutputFormat::Table => print_activity_table(&entries),
    }
    Ok(())
}

fn print_activity_table(entries: &[RequestLogEntry]) {
    println!("{}", "Recent Backend Requests".bold().cyan());
    println!("{}", "=".repeat(78));
    println!(
        "  {:<20} {:<18} {:<10} {:>6} {:>8}  Error",
        "Time", "Endpoint", "Patient", "Status", "Latency"
    );
    println!("  {}", "-".repeat(76));

    for entry in entries {
        let time = crate::model::format_timestamp(Some(entry.timestamp.as_str()));
        let status = entry
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let line = format!(
            "  {:<20} {:<18} {:<10} {:>6} {:>6}ms  {}",
            truncate(&time, 20),
            truncate(&entry.endpoint, 18),
            truncate(&entry.patient, 10),
            status,
            format_number(entry.latency_ms as usize),
            entry.error.as_deref().unwrap_or(""),
        );
        if entry.success {
            println!("{line}");
        } else {
            println!("{}", line.red());
        }
    }
}

fn print_activity_csv(entries: &[RequestLogEntry]) {
    println!("timestamp,endpoint,patient,status,success,latency_ms,error");
    for entry in entries {
        println!(
            "{},{},{},{},{},{},{}",
            entry.timestamp,
            entry.endpoint,
            csv_field(&entry.patient),
            entry.status.map(|s| s.to_string()).unwrap_or_default(),
            entry.success,
            entry.latency_ms,
            csv_field(entry.error.as_deref().unwrap_or("")),
        );
    }
}

// ---------------------------------------------------------------------------
// pneumo health
// ---------------------------------------------------------------------------

/// Check config files, backend reachability, and the request log.
pub fn run_health() -> Result<()> {
    println!("{}", "pneumo Health Check".bold().cyan());
    println!("{}", "=".repeat(40));

    let global_exists = config::global_config_file()
        .map(|p| p.exists())
        .unwrap_or(false);
    let project_exists = config::project_config_file()
        .map(|p| p.exists())
        .unwrap_or(false);
    let cfg = config::load();
    print_health_item(
        "Global config",
        global_exists,
        if global_exists {
            "~/.pneumo/config.toml found"
        } else {
            "not found (run `pneumo config init` to create)"
        },
    );
    print_health_item(
        "Project config",
        project_exists,
        if project_exists {
            ".pneumo.toml found"
        } else {
            "none (optional)"
        },
    );

    let backend = HttpBackend::from_config(&cfg);
    let reachable = backend.is_reachable();
    let detail = if reachable {
        format!("reachable at {}", backend.base_url())
    } else {
        format!("not reachable at {}. Is the diagnosis service running?", backend.base_url())
    };
    print_health_item("Backend", reachable, &detail);

    print_health_item(
        "Progress simulation",
        true,
        &if cfg.progress.enabled {
            format!(
                "on, tick {}ms, visible for at least {}ms",
                cfg.progress.tick_ms, cfg.progress.min_visible_ms
            )
        } else {
            "off (plain loading state)".to_string()
        },
    );

    let log_exists = logger::request_log_path()
        .map(|p| p.exists())
        .unwrap_or(false);
    let entries = if log_exists {
        logger::read_all_entries()
    } else {
        Vec::new()
    };
    let failures = entries.iter().filter(|e| !e.success).count();
    print_health_item(
        "Request log",
        log_exists && cfg.logging.enabled,
        &if !cfg.logging.enabled {
            "disabled (set PNEUMO_LOG=1 to enable)".to_string()
        } else if log_exists {
            format!(
                "{} entries, {} failed",
                format_number(entries.len()),
                format_number(failures)
            )
        } else {
            "no log file yet".to_string()
        },
    );

    Ok(())
}

fn print_health_item(name: &str, ok: bool, detail: &str) {
    let status = if ok {
        "✓".green().bold()
    } else {
        "✗".red().bold()
    };
    println!("  {} {:<25} {}", status, name, detail.dimmed());
}

// ---------------------------------------------------------------------------
// pneumo config show | init | set | reset
// ---------------------------------------------------------------------------

/// Show the effective (merged) configuration as TOML.
pub fn run_config_show() -> Result<()> {
    let toml_str = config::show_effective_config()?;
    println!("{}", "Effective pneumo Configuration".bold().cyan());
    println!("{}", "=".repeat(50));
    println!();
    println!("{toml_str}");

    let global_exists = config::global_config_file()
        .map(|p| p.exists())
        .unwrap_or(false);
    let project_exists = config::project_config_file()
        .map(|p| p.exists())
        .unwrap_or(false);
    println!("{}", "Sources (highest priority last):".dimmed());
    println!("  {} built-in defaults", "·".dimmed());
    if global_exists {
        println!("  {} {}", "✓".green(), "~/.pneumo/config.toml".dimmed());
    } else {
        println!(
            "  {} {}",
            "·".dimmed(),
            "~/.pneumo/config.toml (not found)".dimmed()
        );
    }
    if project_exists {
        println!("  {} {}", "✓".green(), ".pneumo.toml".dimmed());
    } else {
        println!("  {} {}", "·".dimmed(), ".pneumo.toml (not found)".dimmed());
    }
    println!(
        "  {} {}",
        "·".dimmed(),
        "PNEUMO_* environment variables".dimmed()
    );

    Ok(())
}

/// Initialize a default config file at `~/.pneumo/config.toml`.
pub fn run_config_init(force: bool) -> Result<()> {
    let path = config::init_config(force)?;
    println!(
        "{} Config written to {}",
        "✓".green().bold(),
        path.display()
    );
    println!(
        "  {}",
        "Edit the file to point pneumo at your diagnosis backend.".dimmed()
    );
    Ok(())
}

/// Set a single configuration value in the global config file.
pub fn run_config_set(key: &str, value: &str) -> Result<()> {
    config::set_config_value(key, value)?;
    println!("{} Set {} = {}", "✓".green().bold(), key.bold(), value);
    Ok(())
}

/// Reset configuration to defaults.
pub fn run_config_reset() -> Result<()> {
    let path = config::reset_config()?;
    println!(
        "{} Config reset to defaults at {}",
        "✓".green().bold(),
        path.display()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// Format a number with comma separators for readability.
fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    result.chars().rev().collect()
}

/// Truncate a string to `max_len` characters, appending "…" if truncated.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}

/// Quote a CSV field when it contains a separator, quote or newline.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
