// SPDX-License-Identifier: MIT OR Apache-2.0
//! OpenAPI 3.0 import: flatten `paths` × HTTP methods into route rules.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tollgate_core::{ProviderBinding, RouteAuth, RouteRule};

const HTTP_METHODS: &[&str] = &["get", "post", "put", "delete", "patch", "head", "options"];

/// Defaults applied to every imported rule.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportDefaults {
    /// Provider identifier recorded on every imported rule.
    pub provider_id: String,
    /// Backend base URL for every imported rule.
    pub backend_url: String,
    /// Per-call price for every imported rule.
    #[serde(with = "rust_decimal::serde::str")]
    pub price_usdc: Decimal,
    /// Optional provider auth header.
    #[serde(default)]
    pub auth: Option<RouteAuth>,
}

/// Import failures.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// The document has no `paths` object.
    #[error("document has no paths object")]
    NoPaths,

    /// The document produced zero usable operations.
    #[error("document contains no operations")]
    Empty,
}

/// Result of an import: derived rules plus the operations that were
/// skipped (duplicate tool ids within the document).
#[derive(Debug)]
pub struct ImportOutcome {
    /// Rules derived from the document, in document order.
    pub routes: Vec<RouteRule>,
    /// `tool_id`s skipped because an earlier operation already claimed them.
    pub skipped: Vec<String>,
}

/// Flatten a loose OpenAPI 3.0 document into route rules.
///
/// `tool_id` comes from the slugified `operationId` when present,
/// otherwise from a method+path slug. Path templates are converted from
/// `{name}` to `:name`.
pub fn import_openapi(doc: &Value, defaults: &ImportDefaults) -> Result<ImportOutcome, ImportError> {
    let paths = doc
        .get("paths")
        .and_then(Value::as_object)
        .ok_or(ImportError::NoPaths)?;

    let mut routes: Vec<RouteRule> = Vec::new();
    let mut skipped = Vec::new();

    for (raw_path, item) in paths {
        let Some(item) = item.as_object() else {
            continue;
        };
        for method in HTTP_METHODS {
            let Some(operation) = item.get(*method) else {
                continue;
            };

            let tool_id = operation
                .get("operationId")
                .and_then(Value::as_str)
                .map(slugify)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| slugify(&format!("{method} {raw_path}")));

            if routes.iter().any(|r| r.tool_id == tool_id) {
                skipped.push(tool_id);
                continue;
            }

            let description = operation
                .get("summary")
                .or_else(|| operation.get("description"))
                .and_then(Value::as_str)
                .map(String::from);

            routes.push(RouteRule {
                method: method.to_uppercase(),
                path: convert_template(raw_path),
                tool_id,
                price_usdc: defaults.price_usdc,
                provider: ProviderBinding {
                    provider_id: defaults.provider_id.clone(),
                    backend_url: defaults.backend_url.clone(),
                    auth: defaults.auth.clone(),
                },
                group: doc
                    .get("info")
                    .and_then(|i| i.get("title"))
                    .and_then(Value::as_str)
                    .map(String::from),
                description,
                restricted: false,
                skip_ssrf: false,
            });
        }
    }

    if routes.is_empty() {
        return Err(ImportError::Empty);
    }

    Ok(ImportOutcome { routes, skipped })
}

/// `{name}` path segments become `:name` template segments.
fn convert_template(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if let Some(name) = seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                format!(":{name}")
            } else {
                seg.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn slugify(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_dash = true;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash {
            out.push('-');
            prev_dash = true;
        }
    }
    out.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tollgate_core::parse_price;

    fn defaults() -> ImportDefaults {
        ImportDefaults {
            provider_id: "weather".into(),
            backend_url: "https://api.weather.example".into(),
            price_usdc: parse_price("0.02").unwrap(),
            auth: None,
        }
    }

    #[test]
    fn flattens_paths_and_methods() {
        let doc = json!({
            "openapi": "3.0.0",
            "info": { "title": "Weather API" },
            "paths": {
                "/cities/{cityId}/forecast": {
                    "get": { "operationId": "getForecast", "summary": "Daily forecast" },
                    "post": {}
                },
                "/cities": {
                    "get": { "operationId": "listCities" }
                }
            }
        });

        let outcome = import_openapi(&doc, &defaults()).unwrap();
        assert_eq!(outcome.routes.len(), 3);
        assert!(outcome.skipped.is_empty());

        let forecast = outcome
            .routes
            .iter()
            .find(|r| r.tool_id == "getforecast")
            .unwrap();
        assert_eq!(forecast.method, "GET");
        assert_eq!(forecast.path, "/cities/:cityId/forecast");
        assert_eq!(forecast.description.as_deref(), Some("Daily forecast"));
        assert_eq!(forecast.group.as_deref(), Some("Weather API"));
        assert_eq!(forecast.price_usdc, parse_price("0.02").unwrap());

        let posted = outcome
            .routes
            .iter()
            .find(|r| r.method == "POST")
            .unwrap();
        assert_eq!(posted.tool_id, "post-cities-cityid-forecast");
    }

    #[test]
    fn duplicate_operation_ids_are_skipped() {
        let doc = json!({
            "paths": {
                "/a": { "get": { "operationId": "dup" } },
                "/b": { "get": { "operationId": "dup" } }
            }
        });
        let outcome = import_openapi(&doc, &defaults()).unwrap();
        assert_eq!(outcome.routes.len(), 1);
        assert_eq!(outcome.skipped, vec!["dup".to_string()]);
    }

    #[test]
    fn empty_documents_fail() {
        assert!(matches!(
            import_openapi(&json!({}), &defaults()),
            Err(ImportError::NoPaths)
        ));
        assert!(matches!(
            import_openapi(&json!({"paths": {}}), &defaults()),
            Err(ImportError::Empty)
        ));
    }

    #[test]
    fn slugify_normalizes() {
        assert_eq!(slugify("getForecast"), "getforecast");
        assert_eq!(slugify("get /cities/{id}"), "get-cities-id");
        assert_eq!(slugify("  weird__Name!! "), "weird-name");
    }
}
