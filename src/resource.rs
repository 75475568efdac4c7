//! Resource specifications that decide which requests a filter applies to.
//!
//! A filter is configured with a string of comma-separated clauses, each a
//! list of HTTP methods followed by a path template:
//!
//! ```text
//! POST /v2.0/subnets
//! GET /v2.0/networks{.format}
//! PUT DELETE /v2/ports/{port_id}
//! * /v2.0/ports
//! ```
//!
//! # Path Templates
//!
//! - Literal segments compare exactly (case-sensitive).
//! - `{name}` matches exactly one non-empty path segment.
//! - A trailing `{.format}` additionally accepts a `.ext` suffix on the last
//!   segment (`/v2.0/networks.json`, `/v2.0/networks.xml`).
//! - The query string never takes part in matching.
//!
//! # Design Decisions
//! - Parsed once when the filter chain is built, immutable afterwards
//! - Matching never fails; malformed configuration fails at parse time
//! - A request matches when *any* clause matches

use std::collections::BTreeSet;
use std::fmt;

use axum::http::{Method, Request};

use crate::error::ConfigurationError;

/// Trailing template marker for an optional format extension.
pub const FORMAT_SUFFIX_MARKER: &str = "{.format}";

/// Methods a [`ResourceSpec`] accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodSet {
    /// `*`: any method.
    Any,
    /// An explicit, non-empty set of uppercase methods.
    Only(BTreeSet<String>),
}

impl MethodSet {
    /// Case-insensitive membership check.
    pub fn contains(&self, method: &str) -> bool {
        match self {
            MethodSet::Any => true,
            MethodSet::Only(methods) => methods.contains(&method.to_ascii_uppercase()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder,
}

/// A parsed path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
    format_suffix: bool,
}

impl PathTemplate {
    fn parse(raw: &str, clause: &str) -> Result<Self, ConfigurationError> {
        let (bare, format_suffix) = match raw.strip_suffix(FORMAT_SUFFIX_MARKER) {
            Some(bare) => (bare, true),
            None => (raw, false),
        };

        let invalid = || ConfigurationError::InvalidPlaceholder {
            clause: clause.to_string(),
        };

        let segments = bare
            .split('/')
            .map(|segment| {
                if !segment.contains(['{', '}']) {
                    return Ok(Segment::Literal(segment.to_string()));
                }
                let name = segment
                    .strip_prefix('{')
                    .and_then(|s| s.strip_suffix('}'))
                    .ok_or_else(invalid)?;
                if name.is_empty() || name.contains(['{', '}', '.']) {
                    return Err(invalid());
                }
                Ok(Segment::Placeholder)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: raw.to_string(),
            segments,
            format_suffix,
        })
    }

    /// The template as written in configuration.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the template ends with [`FORMAT_SUFFIX_MARKER`].
    pub fn has_format_suffix(&self) -> bool {
        self.format_suffix
    }

    /// Match a request path (query string already removed).
    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() != self.segments.len() {
            return false;
        }

        let last = self.segments.len().saturating_sub(1);
        self.segments
            .iter()
            .zip(parts)
            .enumerate()
            .all(|(i, (segment, part))| match segment {
                Segment::Placeholder => !part.is_empty(),
                Segment::Literal(literal) if part == literal => true,
                Segment::Literal(literal) => {
                    self.format_suffix
                        && i == last
                        && part
                            .strip_prefix(literal.as_str())
                            .and_then(|rest| rest.strip_prefix('.'))
                            .is_some_and(|ext| !ext.is_empty())
                }
            })
    }
}

/// One allowed (method-set, path-template) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    methods: MethodSet,
    path: PathTemplate,
}

impl ResourceSpec {
    /// Parse a single `METHOD [METHOD...] /path` clause.
    pub fn parse(clause: &str) -> Result<Self, ConfigurationError> {
        let tokens: Vec<&str> = clause.split_whitespace().collect();

        let (path, method_tokens) = match tokens.split_last() {
            Some((path, methods)) if path.starts_with('/') => (*path, methods),
            _ => {
                return Err(ConfigurationError::MissingPath {
                    clause: clause.to_string(),
                });
            }
        };

        if method_tokens.is_empty() {
            return Err(ConfigurationError::MissingMethod {
                clause: clause.to_string(),
            });
        }

        let methods = parse_methods(method_tokens, clause)?;
        let path = PathTemplate::parse(path, clause)?;

        Ok(Self { methods, path })
    }

    pub fn methods(&self) -> &MethodSet {
        &self.methods
    }

    pub fn path(&self) -> &PathTemplate {
        &self.path
    }

    /// Whether `method` and `path` satisfy this spec.
    pub fn matches(&self, method: &str, path: &str) -> bool {
        self.methods.contains(method) && self.path.matches(strip_query(path))
    }
}

fn parse_methods(tokens: &[&str], clause: &str) -> Result<MethodSet, ConfigurationError> {
    if tokens.contains(&"*") {
        return Ok(MethodSet::Any);
    }

    tokens
        .iter()
        .map(|token| {
            let upper = token.to_ascii_uppercase();
            // Method::from_bytes enforces the RFC 7230 token grammar
            match Method::from_bytes(upper.as_bytes()) {
                Ok(_) if !upper.starts_with('/') => Ok(upper),
                _ => Err(ConfigurationError::InvalidMethod {
                    clause: clause.to_string(),
                    method: (*token).to_string(),
                }),
            }
        })
        .collect::<Result<BTreeSet<_>, _>>()
        .map(MethodSet::Only)
}

/// Ordered collection of resource specs for one filter.
///
/// The empty collection (`Default`) matches nothing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceConfig {
    specs: Vec<ResourceSpec>,
}

impl ResourceConfig {
    pub fn specs(&self) -> &[ResourceSpec] {
        &self.specs
    }

    /// True when any spec accepts the method and path.
    pub fn matches(&self, method: &str, path: &str) -> bool {
        self.specs.iter().any(|spec| spec.matches(method, path))
    }

    /// Convenience wrapper over [`ResourceConfig::matches`] for an HTTP request.
    pub fn matches_request<B>(&self, req: &Request<B>) -> bool {
        self.matches(req.method().as_str(), req.uri().path())
    }
}

impl std::str::FromStr for ResourceConfig {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_resources(s)
    }
}

impl fmt::Display for ResourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clauses: Vec<String> = self
            .specs
            .iter()
            .map(|spec| {
                let methods = match &spec.methods {
                    MethodSet::Any => "*".to_string(),
                    MethodSet::Only(set) => set.iter().cloned().collect::<Vec<_>>().join(" "),
                };
                format!("{methods} {}", spec.path.as_str())
            })
            .collect();
        write!(f, "{}", clauses.join(","))
    }
}

/// Parse a comma-separated list of `METHOD [METHOD...] /path` clauses.
///
/// # Errors
///
/// Returns [`ConfigurationError`] when the string is empty or any clause is
/// missing a method or a path, or has an invalid method or placeholder.
pub fn parse_resources(spec: &str) -> Result<ResourceConfig, ConfigurationError> {
    if spec.trim().is_empty() {
        return Err(ConfigurationError::EmptyResources);
    }

    let specs = spec
        .split(',')
        .enumerate()
        .map(|(index, clause)| {
            let clause = clause.trim();
            if clause.is_empty() {
                return Err(ConfigurationError::EmptyClause { index });
            }
            ResourceSpec::parse(clause)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ResourceConfig { specs })
}

/// Decide whether a request's method and path match `config`.
///
/// `query` is accepted for symmetry with the request line but never affects
/// the outcome.
pub fn matches(method: &str, path: &str, _query: &str, config: &ResourceConfig) -> bool {
    config.matches(method, path)
}

fn strip_query(path: &str) -> &str {
    path.split_once('?').map_or(path, |(path, _)| path)
}
