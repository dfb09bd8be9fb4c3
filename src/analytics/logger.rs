use std::fs::{self, OpenOptions, create_dir_all};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request log entry (JSONL)
// ---------------------------------------------------------------------------

/// A single entry in the request log (`~/.pneumo/request-log.jsonl`).
///
/// One line per backend call made by the CLI or the web workspace. Read back
/// by `pneumo activity` and `pneumo health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    pub timestamp: String,
    /// Backend path, e.g. `"/predict"`.
    pub endpoint: String,
    /// Patient ID as logged (masked unless masking is turned off).
    #[serde(default)]
    pub patient: String,
    /// HTTP status, absent when the request never got a response.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<u16>,
    pub success: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

/// Keep the first four characters of a patient ID and mask the rest.
///
/// IDs of four characters or fewer are masked entirely; an empty ID stays
/// empty so "all patients" history queries remain recognizable.
pub fn mask_patient_id(patient_id: &str) -> String {
    if patient_id.is_empty() {
        return String::new();
    }
    if patient_id.chars().count() <= 4 {
        return "****".to_string();
    }
    let visible: String = patient_id.chars().take(4).collect();
    format!("{visible}****")
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Append one request to the log. Failures are ignored.
pub fn log_request(endpoint: &str, patient: &str, status: Option<u16>, latency_ms: u64, error: Option<&str>) {
    let entry = RequestLogEntry {
        timestamp: Utc::now().to_rfc3339(),
        endpoint: endpoint.to_string(),
        patient: patient.to_string(),
        status,
        success: error.is_none(),
        latency_ms,
        error: error.map(str::to_string),
    };

    let _ = append_log_entry(&entry);
}

// ---------------------------------------------------------------------------
// Reading log entries
// ---------------------------------------------------------------------------

/// Read all request log entries.
///
/// Silently skips malformed lines. Returns an empty vec if the file does not
/// exist or cannot be read.
pub fn read_all_entries() -> Vec<RequestLogEntry> {
    let Some(path) = request_log_path() else {
        return Vec::new();
    };

    let Ok(file) = fs::File::open(path) else {
        return Vec::new();
    };

    parse_entries(BufReader::new(file))
}

/// The `limit` most recent entries, newest first.
pub fn read_recent(limit: usize) -> Vec<RequestLogEntry> {
    let mut entries = read_all_entries();
    entries.reverse();
    entries.truncate(limit);
    entries
}

fn parse_entries(reader: impl BufRead) -> Vec<RequestLogEntry> {
    reader
        .lines()
        .map_while(Result::ok)
        .filter_map(|line| serde_json::from_str::<RequestLogEntry>(&line).ok())
        .collect()
}

// ---------------------------------------------------------------------------
// File I/O
// ---------------------------------------------------------------------------

fn append_log_entry(entry: &RequestLogEntry) -> Result<()> {
    let Some(path) = request_log_path() else {
        return Ok(());
    };

    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let json = serde_json::to_string(entry)?;
    writeln!(file, "{json}")?;

    Ok(())
}

/// Return the path to the request log file.
pub fn request_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".pneumo").join("request-log.jsonl"))
}
