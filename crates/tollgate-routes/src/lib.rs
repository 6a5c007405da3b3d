// SPDX-License-Identifier: MIT OR Apache-2.0
//! tollgate-routes
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The dispatch side of the gateway: compile route rules into a matchable
//! table, guard backend URLs against SSRF, load/persist the routes file,
//! and import OpenAPI documents.

/// Routes-file load and atomic rewrite.
pub mod file;
/// OpenAPI 3.0 document import.
pub mod import;
/// Private/reserved host guard for backend URLs.
pub mod ssrf;

pub use file::{load_routes, save_routes, FileError, RoutesFile};
pub use import::{import_openapi, ImportDefaults, ImportError, ImportOutcome};
pub use ssrf::{check_backend_url, SsrfError};

use std::collections::{HashMap, HashSet};
use tollgate_core::{RouteError, RouteRule};

/// Validate a submitted rule and run the SSRF pre-check unless the
/// rule's `_skip_ssrf` escape is set (test routes only).
pub fn admit_rule(mut rule: RouteRule) -> Result<RouteRule, RouteError> {
    rule.validate()?;
    if !rule.skip_ssrf {
        check_backend_url(&rule.provider.backend_url).map_err(|e| match e {
            SsrfError::Blocked(host) => RouteError::SsrfBlocked(host),
            SsrfError::Unparsable(reason) => RouteError::InvalidBackendUrl {
                url: rule.provider.backend_url.clone(),
                reason,
            },
        })?;
    }
    Ok(rule)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone)]
struct CompiledRoute {
    index: usize,
    segments: Vec<Segment>,
    /// Number of leading literal segments; first dispatch tie-break.
    concrete_prefix: usize,
    /// Total literal segments; second tie-break.
    literal_count: usize,
}

/// A successful dispatch: the matched rule and its bound parameters.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The matched rule.
    pub rule: RouteRule,
    /// `:name` template segments bound to the literal path values.
    pub params: HashMap<String, String>,
}

/// Immutable compiled dispatch table.
///
/// The daemon keeps the current table behind a copy-on-write snapshot;
/// admin mutations build a new table via [`RouteTable::with_added`] and
/// friends and swap it atomically.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
    compiled: Vec<CompiledRoute>,
}

impl RouteTable {
    /// Compile validated rules into a dispatch table.
    ///
    /// Rules must already have passed [`admit_rule`]; this
    /// revalidates structure and enforces `tool_id` uniqueness.
    pub fn compile(mut rules: Vec<RouteRule>) -> Result<Self, RouteError> {
        let mut seen = HashSet::new();
        for rule in &mut rules {
            rule.validate()?;
            if !seen.insert(rule.tool_id.clone()) {
                return Err(RouteError::DuplicateToolId(rule.tool_id.clone()));
            }
        }

        let compiled = rules
            .iter()
            .enumerate()
            .map(|(index, rule)| compile_one(index, rule))
            .collect();

        Ok(Self { rules, compiled })
    }

    /// All rules, registration order.
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Number of registered rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when no rule is registered.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Look a rule up by `tool_id` (admin introspection; sees restricted
    /// rules too).
    pub fn find(&self, tool_id: &str) -> Option<&RouteRule> {
        self.rules.iter().find(|r| r.tool_id == tool_id)
    }

    /// Dispatch `(method, path)` against the table.
    ///
    /// Restricted rules behave as non-existent here. Ties are broken by
    /// longest concrete prefix, then most literal segments, then first
    /// registered.
    pub fn matches(&self, method: &str, path: &str) -> Option<RouteMatch> {
        let method = method.to_uppercase();
        let path_segments: Vec<&str> = split_path(path);

        let mut best: Option<(&CompiledRoute, HashMap<String, String>)> = None;
        for compiled in &self.compiled {
            let rule = &self.rules[compiled.index];
            if rule.restricted || rule.method != method {
                continue;
            }
            let Some(params) = match_segments(&compiled.segments, &path_segments) else {
                continue;
            };

            let better = match &best {
                None => true,
                Some((current, _)) => {
                    (compiled.concrete_prefix, compiled.literal_count)
                        > (current.concrete_prefix, current.literal_count)
                }
            };
            if better {
                best = Some((compiled, params));
            }
        }

        best.map(|(compiled, params)| RouteMatch {
            rule: self.rules[compiled.index].clone(),
            params,
        })
    }

    /// New table with `rule` appended.
    pub fn with_added(&self, rule: RouteRule) -> Result<Self, RouteError> {
        if self.find(&rule.tool_id).is_some() {
            return Err(RouteError::DuplicateToolId(rule.tool_id));
        }
        let mut rules = self.rules.clone();
        rules.push(rule);
        Self::compile(rules)
    }

    /// New table with the price and/or description of `tool_id` replaced.
    /// Only these two fields are mutable after creation.
    pub fn with_updated(
        &self,
        tool_id: &str,
        price: Option<rust_decimal::Decimal>,
        description: Option<String>,
    ) -> Result<Self, RouteError> {
        if self.find(tool_id).is_none() {
            return Err(RouteError::UnknownToolId(tool_id.to_string()));
        }
        let mut rules = self.rules.clone();
        for rule in &mut rules {
            if rule.tool_id == tool_id {
                if let Some(price) = price {
                    rule.price_usdc = price;
                }
                if let Some(description) = description.clone() {
                    rule.description = Some(description);
                }
            }
        }
        Self::compile(rules)
    }

    /// New table with `tool_id` removed.
    pub fn with_removed(&self, tool_id: &str) -> Result<Self, RouteError> {
        if self.find(tool_id).is_none() {
            return Err(RouteError::UnknownToolId(tool_id.to_string()));
        }
        let rules = self
            .rules
            .iter()
            .filter(|r| r.tool_id != tool_id)
            .cloned()
            .collect();
        Self::compile(rules)
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

fn compile_one(index: usize, rule: &RouteRule) -> CompiledRoute {
    let segments: Vec<Segment> = split_path(&rule.path)
        .into_iter()
        .map(|s| match s.strip_prefix(':') {
            Some(name) => Segment::Param(name.to_string()),
            None => Segment::Literal(s.to_string()),
        })
        .collect();

    let concrete_prefix = segments
        .iter()
        .take_while(|s| matches!(s, Segment::Literal(_)))
        .count();
    let literal_count = segments
        .iter()
        .filter(|s| matches!(s, Segment::Literal(_)))
        .count();

    CompiledRoute {
        index,
        segments,
        concrete_prefix,
        literal_count,
    }
}

fn match_segments(template: &[Segment], path: &[&str]) -> Option<HashMap<String, String>> {
    if template.len() != path.len() {
        return None;
    }
    let mut params = HashMap::new();
    for (seg, actual) in template.iter().zip(path) {
        match seg {
            Segment::Literal(lit) => {
                if lit != actual {
                    return None;
                }
            }
            Segment::Param(name) => {
                params.insert(name.clone(), (*actual).to_string());
            }
        }
    }
    Some(params)
}
