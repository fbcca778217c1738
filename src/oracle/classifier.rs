//! Mapping raw transport responses to verdicts

use crate::http::TransportResponse;
use crate::models::Verdict;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Why a probe was sent, which decides what counts as success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePurpose<'a> {
    /// Filter probing: only "did the filter let it through" matters.
    /// Template errors still mean the payload reached the engine.
    Filter,
    /// Final verification: the payload must also render, the body must
    /// contain `expects` when given, and must not show `source` (the
    /// expression as sent) unevaluated.
    Confirmation {
        source: &'a str,
        expects: Option<&'a str>,
    },
}

/// Pluggable verdict classifier
pub trait Classify: Send + Sync {
    fn classify(&self, response: &TransportResponse, purpose: ProbePurpose<'_>) -> Verdict;
}

/// Target-specific signatures used by [`MarkerClassifier`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Body substrings that mean the filter fired
    pub blocked_markers: Vec<String>,
    /// Regexes over the body that mean the filter fired
    pub blocked_patterns: Vec<String>,
    /// Status codes that mean the filter fired
    pub blocked_status: Vec<u16>,
    /// Status codes that say nothing about the filter (throttling, gateway trouble)
    pub ambiguous_status: Vec<u16>,
    /// Body substrings that mean the engine failed to render the template
    pub render_error_markers: Vec<String>,
    /// Body substring required on confirmation when no expected output is known
    pub success_marker: Option<String>,
    /// Body length of the filter's block page, when it has no marker
    pub blocked_body_length: Option<usize>,
    /// Slack allowed when comparing against `blocked_body_length`
    pub length_tolerance: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            blocked_markers: Vec::new(),
            blocked_patterns: Vec::new(),
            blocked_status: vec![403],
            ambiguous_status: vec![429, 502, 503, 504],
            render_error_markers: vec![
                "TemplateSyntaxError".to_string(),
                "UndefinedError".to_string(),
                "jinja2.exceptions".to_string(),
                "Internal Server Error".to_string(),
            ],
            success_marker: None,
            blocked_body_length: None,
            length_tolerance: 0,
        }
    }
}

/// Classifies by status codes, body markers and block-page length
#[derive(Debug, Clone, Default)]
pub struct MarkerClassifier {
    config: ClassifierConfig,
    patterns: Vec<Regex>,
}

impl MarkerClassifier {
    /// Invalid `blocked_patterns` are logged and skipped
    pub fn new(config: ClassifierConfig) -> Self {
        let patterns = config
            .blocked_patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("Ignoring invalid block pattern {p:?}: {e}");
                    None
                }
            })
            .collect();
        Self { config, patterns }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    fn is_blocked(&self, response: &TransportResponse) -> bool {
        if self.config.blocked_status.contains(&response.status) {
            return true;
        }
        if self
            .config
            .blocked_markers
            .iter()
            .any(|m| !m.is_empty() && response.body.contains(m.as_str()))
        {
            return true;
        }
        if self.patterns.iter().any(|re| re.is_match(&response.body)) {
            return true;
        }
        self.config
            .blocked_body_length
            .is_some_and(|len| response.body.len().abs_diff(len) <= self.config.length_tolerance)
    }

    fn render_failed(&self, response: &TransportResponse) -> bool {
        response.status >= 500
            || self
                .config
                .render_error_markers
                .iter()
                .any(|m| !m.is_empty() && response.body.contains(m.as_str()))
    }
}

impl Classify for MarkerClassifier {
    fn classify(&self, response: &TransportResponse, purpose: ProbePurpose<'_>) -> Verdict {
        if self.config.ambiguous_status.contains(&response.status) {
            return Verdict::Ambiguous(format!("status {}", response.status));
        }
        if self.is_blocked(response) {
            return Verdict::Rejected;
        }

        match purpose {
            ProbePurpose::Filter => Verdict::Accepted,
            ProbePurpose::Confirmation { source, expects } => {
                if self.render_failed(response) {
                    return Verdict::Rejected;
                }
                if !source.is_empty() && response.body.contains(source) {
                    return Verdict::Rejected;
                }
                let marker = expects.or(self.config.success_marker.as_deref());
                match marker {
                    Some(m) if !response.body.contains(m) => Verdict::Rejected,
                    _ => Verdict::Accepted,
                }
            }
        }
    }
}
