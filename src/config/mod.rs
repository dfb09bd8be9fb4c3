/// Configuration system for pneumo.
///
/// Provides a layered configuration hierarchy:
///
/// 1. **Built-in defaults** — hardcoded in [`schema::PneumoConfig::default()`]
/// 2. **User global config** — `~/.pneumo/config.toml`
/// 3. **Project local config** — `.pneumo.toml` in the current working directory
/// 4. **Environment variables** — `PNEUMO_*` overrides (highest precedence)
///
/// Later layers override earlier ones at the key level: a project file that
/// only sets `api.base_url` keeps every other value from the global file.
///
/// # Usage
///
/// ```rust,ignore
/// use pneumo::config;
///
/// let cfg = config::load();
/// let backend = pneumo::api::HttpBackend::from_config(&cfg);
/// ```
pub mod schema;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub use schema::PneumoConfig;

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load the fully resolved configuration.
///
/// Merges all layers in order: defaults → global TOML → project TOML → env
/// vars. Malformed files are skipped so a bad edit never blocks a command.
pub fn load() -> PneumoConfig {
    let mut merged = toml::Value::Table(toml::map::Map::new());

    for path in [global_config_path(), project_config_path()] {
        if let Some(layer) = load_toml_file(path) {
            merge_values(&mut merged, layer);
        }
    }

    let mut config: PneumoConfig = merged.try_into().unwrap_or_default();
    apply_env_overrides(&mut config);
    config
}

/// Read a TOML file as a raw value tree.
///
/// Returns `None` if the path is `None`, the file doesn't exist, or the
/// content is malformed.
fn load_toml_file(path: Option<PathBuf>) -> Option<toml::Value> {
    let path = path?;
    let content = fs::read_to_string(&path).ok()?;
    let value: toml::Value = toml::from_str(&content).ok()?;
    // Reject files whose shape doesn't match the schema at all.
    value.clone().try_into::<PneumoConfig>().ok()?;
    Some(value)
}

/// Deep-merge `overlay` into `base`. Tables merge key by key; any other
/// value in the overlay replaces the base value.
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

// ---------------------------------------------------------------------------
// File paths
// ---------------------------------------------------------------------------

/// Path to the user global config: `~/.pneumo/config.toml`.
fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".pneumo").join("config.toml"))
}

/// Path to the project local config: `.pneumo.toml` in the current directory.
fn project_config_path() -> Option<PathBuf> {
    std::env::current_dir()
        .ok()
        .map(|cwd| cwd.join(".pneumo.toml"))
}

/// Return the path to the global config file for display/init purposes.
pub fn global_config_file() -> Option<PathBuf> {
    global_config_path()
}

/// Return the path to the project config file for display purposes.
pub fn project_config_file() -> Option<PathBuf> {
    project_config_path()
}

// ---------------------------------------------------------------------------
// Environment variable overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides (highest precedence layer).
///
/// Supported variables:
/// - `PNEUMO_API_BASE_URL` — backend base URL (`VITE_API_BASE_URL` is also
///   honored when the former is unset)
/// - `PNEUMO_PROGRESS` — simulated progress bar (`1`/`true`/`yes`/`on`)
/// - `PNEUMO_MIN_VISIBLE_MS` — minimum loading duration
/// - `PNEUMO_WEB_ADDR` — web workspace listen address
/// - `PNEUMO_LOG` — request logging
fn apply_env_overrides(config: &mut PneumoConfig) {
    let base_url = std::env::var("PNEUMO_API_BASE_URL")
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| std::env::var("VITE_API_BASE_URL").ok().filter(|v| !v.is_empty()));
    if let Some(url) = base_url {
        config.api.base_url = url;
    }

    if let Ok(val) = std::env::var("PNEUMO_PROGRESS") {
        config.progress.enabled = is_truthy(&val);
    }
    if let Ok(val) = std::env::var("PNEUMO_MIN_VISIBLE_MS")
        && let Ok(ms) = val.parse::<u64>()
    {
        config.progress.min_visible_ms = ms;
    }
    if let Ok(val) = std::env::var("PNEUMO_WEB_ADDR")
        && !val.is_empty()
    {
        config.web.addr = val;
    }
    if let Ok(val) = std::env::var("PNEUMO_LOG") {
        config.logging.enabled = is_truthy(&val);
    }
}

/// Check if a string value represents a truthy boolean.
fn is_truthy(val: &str) -> bool {
    matches!(
        val.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

// ---------------------------------------------------------------------------
// Config init / set / reset
// ---------------------------------------------------------------------------

/// Write the default annotated config to `~/.pneumo/config.toml`.
///
/// Creates the `~/.pneumo/` directory if it doesn't exist. Returns an error
/// if the file already exists (use `force = true` to overwrite).
pub fn init_config(force: bool) -> Result<PathBuf> {
    let path = global_config_path().context("could not determine home directory")?;

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("failed to create ~/.pneumo/ directory")?;
    }

    fs::write(&path, PneumoConfig::default_toml()).context("failed to write config file")?;

    Ok(path)
}

/// Set a single config key to a value in the global config file.
///
/// Reads the current global config (or the defaults), updates the dotted
/// key (e.g. `progress.min_visible_ms`), validates the result against the
/// schema, and writes it back.
pub fn set_config_value(key: &str, value: &str) -> Result<()> {
    let path = global_config_path().context("could not determine home directory")?;

    let mut root: toml::Value = if path.exists() {
        let content = fs::read_to_string(&path).context("failed to read config file")?;
        toml::from_str(&content).context("failed to parse config as TOML value")?
    } else {
        let defaults =
            toml::to_string_pretty(&PneumoConfig::default()).context("failed to serialize default config")?;
        toml::from_str(&defaults).context("failed to parse serialized defaults")?
    };

    set_toml_value(&mut root, key, value)?;
    root.clone()
        .try_into::<PneumoConfig>()
        .with_context(|| format!("invalid value for '{key}': {value}"))?;

    let output = toml::to_string_pretty(&root).context("failed to serialize updated config")?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("failed to create config directory")?;
    }
    fs::write(&path, output).context("failed to write config file")?;

    Ok(())
}

/// Set a value in a TOML value tree using a dotted key path.
///
/// Missing intermediate tables are created, so a sparse config file can
/// gain new sections. The new value takes the type of the existing one, or
/// of the schema default when the key is absent.
fn set_toml_value(root: &mut toml::Value, key: &str, raw_value: &str) -> Result<()> {
    let parts: Vec<&str> = key.split('.').filter(|p| !p.is_empty()).collect();
    let Some((&leaf, sections)) = parts.split_last() else {
        anyhow::bail!("empty config key");
    };

    let defaults = toml::Value::try_from(PneumoConfig::default()).context("failed to serialize defaults")?;
    let mut template = Some(&defaults);
    for &part in sections {
        template = template.and_then(|t| t.get(part));
    }
    let template = template
        .and_then(|t| t.get(leaf))
        .with_context(|| format!("unknown config key: '{key}'"))?;

    let mut current = root;
    for &part in sections {
        let table = current
            .as_table_mut()
            .with_context(|| format!("expected table above '{key}'"))?;
        current = table
            .entry(part.to_string())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }

    let table = current.as_table_mut().with_context(|| {
        format!(
            "expected table at '{}'",
            key.rsplit_once('.').map(|(s, _)| s).unwrap_or("")
        )
    })?;

    let existing = table.get(leaf).unwrap_or(template);
    let new_value = match existing {
        toml::Value::Boolean(_) => toml::Value::Boolean(is_truthy(raw_value)),
        toml::Value::Integer(_) => {
            let n: i64 = raw_value
                .parse()
                .with_context(|| format!("expected integer for '{key}', got '{raw_value}'"))?;
            toml::Value::Integer(n)
        }
        toml::Value::Float(_) => {
            let f: f64 = raw_value
                .parse()
                .with_context(|| format!("expected float for '{key}', got '{raw_value}'"))?;
            toml::Value::Float(f)
        }
        _ => toml::Value::String(raw_value.to_string()),
    };

    table.insert(leaf.to_string(), new_value);
    Ok(())
}

/// Reset the global config to defaults (overwrite the file).
pub fn reset_config() -> Result<PathBuf> {
    init_config(true)
}

/// Show the effective (fully resolved) config as TOML.
pub fn show_effective_config() -> Result<String> {
    let config = load();
    toml::to_string_pretty(&config).context("failed to serialize effective config")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
