/// Configuration schema and defaults for pneumo.
///
/// Defines the TOML-serializable configuration structure with the sections
/// `[api]`, `[progress]`, `[web]` and `[logging]`.
///
/// Every field has a built-in default. Users only need to set the values
/// they want to override.
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level pneumo configuration.
///
/// Maps directly to the `~/.pneumo/config.toml` and `.pneumo.toml` file
/// schemas. All sections and fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PneumoConfig {
    pub api: ApiConfig,
    pub progress: ProgressConfig,
    pub web: WebConfig,
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// [api]
// ---------------------------------------------------------------------------

/// Diagnosis backend connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL the `/predict`, `/explain` and `/patients/history` paths are
    /// appended to.
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// [progress]
// ---------------------------------------------------------------------------

/// Simulated progress shown while an XAI report is generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Show the simulated progress bar. When off, a plain loading state is
    /// shown and results appear as soon as they arrive.
    pub enabled: bool,
    /// Ticker interval (milliseconds).
    pub tick_ms: u64,
    /// Smallest random increment per tick (percentage points).
    pub min_step: f64,
    /// Largest random increment per tick (percentage points).
    pub max_step: f64,
    /// Minimum time the loading state stays on screen (milliseconds).
    pub min_visible_ms: u64,
    /// Step count displayed next to the percentage.
    pub total_steps: u32,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_ms: 400,
            min_step: 2.0,
            max_step: 9.0,
            min_visible_ms: 1500,
            total_steps: 500,
        }
    }
}

// ---------------------------------------------------------------------------
// [web]
// ---------------------------------------------------------------------------

/// Local web workspace settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Listen address for `pneumo web`.
    pub addr: String,
    /// Open the workspace in the default browser on start.
    pub open_browser: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:9747".to_string(),
            open_browser: true,
        }
    }
}

// ---------------------------------------------------------------------------
// [logging]
// ---------------------------------------------------------------------------

/// Request log settings (`~/.pneumo/request-log.jsonl`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Record every backend call.
    pub enabled: bool,
    /// Keep only the first four characters of patient IDs in the log.
    pub mask_patient_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mask_patient_ids: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Default TOML
// ---------------------------------------------------------------------------

impl PneumoConfig {
    /// Annotated default config written by `pneumo config init`.
    pub fn default_toml() -> &'static str {
        r#"# pneumo configuration
#
# Precedence (highest last): built-in defaults, this file, .pneumo.toml in
# the working directory, PNEUMO_* environment variables.

[api]
# Base URL of the diagnosis backend.
base_url = "http://localhost:5000"

[progress]
# Simulated progress bar while the XAI report is generated.
enabled = true
tick_ms = 400
min_step = 2.0
max_step = 9.0
# Keep the loading state visible at least this long (milliseconds).
min_visible_ms = 1500
total_steps = 500

[web]
addr = "127.0.0.1:9747"
open_browser = true

[logging]
# Request log at ~/.pneumo/request-log.jsonl
enabled = true
mask_patient_ids = true
"#
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
