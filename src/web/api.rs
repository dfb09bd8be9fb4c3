//! JSON and query-string helpers for the web workspace.

use anyhow::{Context, Result};

use crate::workspace::Workspace;

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

/// `GET /api/state` — the workspace snapshot as JSON.
pub fn state_json(workspace: &Workspace) -> Result<String> {
    serde_json::to_string(&workspace.snapshot()).context("failed to serialize workspace state")
}

// ---------------------------------------------------------------------------
// Query strings
// ---------------------------------------------------------------------------

/// Extract and percent-decode a query parameter from a request URL.
///
/// Returns `None` when the parameter is absent. A present but empty
/// parameter (`?patientId=`) yields `Some("")`.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    url.split_once('?')?.1.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        if decode_component(k) == name {
            Some(decode_component(v))
        } else {
            None
        }
    })
}

/// Decode `application/x-www-form-urlencoded` text: `+` is a space and
/// `%XX` an escaped byte. Text that does not decode to UTF-8 is kept verbatim.
pub fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
