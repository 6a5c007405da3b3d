// SPDX-License-Identifier: MIT OR Apache-2.0
//! Routes-file load and atomic rewrite.
//!
//! The file is a JSON document `{"routes": [RouteRule, ...]}`. A
//! validation error fails startup; admin mutations rewrite the file
//! atomically (write-then-rename) when one is configured.

use crate::admit_rule;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tollgate_core::{RouteError, RouteRule};
use tracing::info;

/// On-disk shape of the routes file.
#[derive(Debug, Serialize, Deserialize)]
pub struct RoutesFile {
    /// The configured rules.
    pub routes: Vec<serde_json::Value>,
}

/// Errors loading or persisting the routes file.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    /// Filesystem failure.
    #[error("routes file io: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid JSON of the expected shape.
    #[error("routes file parse: {0}")]
    Parse(#[from] serde_json::Error),

    /// A rule inside the document failed validation.
    #[error("routes file rule: {0}")]
    Rule(#[from] RouteError),
}

/// Load and admit every rule from `path`.
///
/// Each entry may carry `"_skip_ssrf": true` to escape the SSRF
/// pre-check for that rule (test routes).
pub fn load_routes(path: &Path) -> Result<Vec<RouteRule>, FileError> {
    let raw = fs::read_to_string(path)?;
    let doc: RoutesFile = serde_json::from_str(&raw)?;

    let mut rules = Vec::with_capacity(doc.routes.len());
    for entry in doc.routes {
        let rule: RouteRule = serde_json::from_value(entry)?;
        rules.push(admit_rule(rule)?);
    }

    info!(path = %path.display(), count = rules.len(), "routes file loaded");
    Ok(rules)
}

/// Atomically rewrite `path` with the given rules.
pub fn save_routes(path: &Path, rules: &[RouteRule]) -> Result<(), FileError> {
    let doc = serde_json::json!({ "routes": rules });
    let pretty = serde_json::to_string_pretty(&doc)?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, pretty)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
