//! Core data models for Daedalus

use crate::engine::AttackOutcome;
use crate::oracle::classifier::ClassifierConfig;
use crate::oracle::retry::RetryPolicy;
use crate::synth::SearchBudget;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Verdict for a single probe against the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The payload passed the filter (and, for confirmations, evaluated)
    Accepted,
    /// The filter blocked the payload or the engine failed to render it
    Rejected,
    /// The response matched neither signature (timeout, throttling, partial body)
    Ambiguous(String),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Accepted => write!(f, "accepted"),
            Verdict::Rejected => write!(f, "rejected"),
            Verdict::Ambiguous(detail) => write!(f, "ambiguous ({detail})"),
        }
    }
}

/// Template delimiter syntax used to wrap a synthesized expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelimiterStyle {
    /// `{{ expr }}`
    DoubleBrace,
    /// `{%print(expr)%}`
    PrintStatement,
}

impl DelimiterStyle {
    /// All styles in the order they are tried
    pub const ALL: [DelimiterStyle; 2] = [DelimiterStyle::DoubleBrace, DelimiterStyle::PrintStatement];

    /// Wraps an expression in this delimiter
    pub fn wrap(&self, expression: &str) -> String {
        match self {
            DelimiterStyle::DoubleBrace => format!("{{{{{expression}}}}}"),
            DelimiterStyle::PrintStatement => format!("{{%print({expression})%}}"),
        }
    }

    /// Smallest complete template statement using this delimiter
    pub fn carrier(&self) -> String {
        self.wrap("7")
    }

    fn as_str(&self) -> &'static str {
        match self {
            DelimiterStyle::DoubleBrace => "double_brace",
            DelimiterStyle::PrintStatement => "print_statement",
        }
    }
}

/// The smallest unit of filter knowledge
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Atom {
    /// A single character
    Char(char),
    /// A word from the known vocabulary (identifiers, filter names)
    Keyword(String),
    /// Any other literal text, including learned blocked patterns
    Fragment(String),
    /// A template delimiter pair
    Delimiter(DelimiterStyle),
}

impl Atom {
    /// Stable identifier used in persisted sessions
    pub fn id(&self) -> String {
        match self {
            Atom::Char(c) => format!("char:{c}"),
            Atom::Keyword(k) => format!("keyword:{k}"),
            Atom::Fragment(f) => format!("fragment:{f}"),
            Atom::Delimiter(d) => format!("delimiter:{}", d.as_str()),
        }
    }

    /// Parses an identifier produced by [`Atom::id`]
    pub fn from_id(id: &str) -> Option<Atom> {
        let (kind, rest) = id.split_once(':')?;
        match kind {
            "char" => {
                let mut chars = rest.chars();
                let c = chars.next()?;
                chars.next().is_none().then_some(Atom::Char(c))
            }
            "keyword" if !rest.is_empty() => Some(Atom::Keyword(rest.to_string())),
            "fragment" if !rest.is_empty() => Some(Atom::Fragment(rest.to_string())),
            "delimiter" => DelimiterStyle::ALL
                .into_iter()
                .find(|d| d.as_str() == rest)
                .map(Atom::Delimiter),
            _ => None,
        }
    }

    /// Literal text the atom stands for, if it is textual
    pub fn text(&self) -> Option<String> {
        match self {
            Atom::Char(c) => Some(c.to_string()),
            Atom::Keyword(t) | Atom::Fragment(t) => Some(t.clone()),
            Atom::Delimiter(_) => None,
        }
    }

    /// Probe payload that fails only if this atom is blocked
    pub fn carrier(&self) -> String {
        match self {
            Atom::Delimiter(d) => d.carrier(),
            other => other.text().unwrap_or_default(),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Char(c) => write!(f, "char {c:?}"),
            Atom::Keyword(k) => write!(f, "keyword {k:?}"),
            Atom::Fragment(t) => write!(f, "fragment {t:?}"),
            Atom::Delimiter(d) => write!(f, "delimiter {}", d.carrier()),
        }
    }
}

/// Whether the filter lets an atom through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Allowed,
    Blocked,
}

/// How a fact was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Observed directly by probing the atom's carrier
    Confirmed,
    /// Derived from other facts without a probe
    Inferred,
    /// Probes never settled; assumed blocked
    FailClosed,
}

/// A single learned fact about the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub status: Status,
    pub confidence: Confidence,
}

impl Fact {
    pub fn allowed(confidence: Confidence) -> Self {
        Self {
            status: Status::Allowed,
            confidence,
        }
    }

    pub fn blocked(confidence: Confidence) -> Self {
        Self {
            status: Status::Blocked,
            confidence,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.status == Status::Allowed
    }
}

/// Globals available to the template, which decides the usable routes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateEnvironment {
    /// Plain Jinja2 globals only (`lipsum`, `cycler`, `joiner`, `namespace`, ...)
    #[default]
    Jinja2,
    /// Jinja2 rendered by Flask (adds `config`, `url_for`, `request`, ...)
    Flask,
}

impl std::str::FromStr for TemplateEnvironment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jinja2" | "jinja" => Ok(TemplateEnvironment::Jinja2),
            "flask" => Ok(TemplateEnvironment::Flask),
            other => Err(format!("unknown environment '{other}' (use jinja2 or flask)")),
        }
    }
}

/// How the payload reaches the vulnerable parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitMode {
    /// Query string parameter
    #[default]
    Query,
    /// `application/x-www-form-urlencoded` body field
    Form,
    /// Key of a JSON object body
    Json,
    /// Appended to the URL path
    Path,
}

impl std::str::FromStr for SubmitMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "query" | "get" => Ok(SubmitMode::Query),
            "form" | "post" => Ok(SubmitMode::Form),
            "json" => Ok(SubmitMode::Json),
            "path" => Ok(SubmitMode::Path),
            other => Err(format!("unknown submit mode '{other}'")),
        }
    }
}

/// Configuration for one engagement against one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementConfig {
    /// Target URL
    pub target: String,
    /// Vulnerable parameter (ignored in path mode)
    pub param: String,
    /// How the payload is delivered
    pub mode: SubmitMode,
    /// Extra parameters sent with every request
    #[serde(default)]
    pub extra_params: HashMap<String, String>,
    /// Parameter that carries call arguments outside the filtered one
    #[serde(default)]
    pub arg_param: Option<String>,
    /// Custom HTTP headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// HTTP/HTTPS proxy URL
    pub proxy: Option<String>,
    /// User-Agent header value
    pub user_agent: String,
    /// Skip TLS certificate verification
    #[serde(default)]
    pub insecure: bool,
    /// Per-probe timeout in seconds
    pub timeout_secs: u64,
    /// Maximum probes per second (None = unlimited)
    pub rate_limit: Option<u32>,
    /// Concurrent probes in flight
    pub threads: usize,
    /// Retry policy for ambiguous verdicts
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Search bounds for the synthesizer
    #[serde(default)]
    pub budget: SearchBudget,
    /// Template globals available on the target
    #[serde(default)]
    pub environment: TemplateEnvironment,
    /// Response classification rules
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// File used to persist learned filter knowledge
    #[serde(default)]
    pub session_file: Option<PathBuf>,
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            param: String::new(),
            mode: SubmitMode::Query,
            extra_params: HashMap::new(),
            arg_param: None,
            headers: HashMap::new(),
            proxy: None,
            user_agent: "Daedalus/0.1.0".to_string(),
            insecure: false,
            timeout_secs: 10,
            rate_limit: Some(20),
            threads: 4,
            retry: RetryPolicy::default(),
            budget: SearchBudget::default(),
            environment: TemplateEnvironment::Jinja2,
            classifier: ClassifierConfig::default(),
            session_file: None,
        }
    }
}

/// Record of a complete engagement, exported by the JSON reporter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementReport {
    /// Target URL or identity
    pub target: String,
    /// Unique engagement identifier
    pub engagement_id: String,
    /// Requested capability, human readable
    pub capability: String,
    /// Start time (local timezone)
    pub started_at: DateTime<Local>,
    /// End time (local timezone)
    pub finished_at: Option<DateTime<Local>>,
    /// Final result
    pub outcome: AttackOutcome,
    /// Total probes sent to the target
    pub total_probes: u64,
    /// Atoms found blocked during the engagement
    pub blocked_atoms: Vec<String>,
}

impl EngagementReport {
    pub fn new(target: impl Into<String>, capability: impl Into<String>, outcome: AttackOutcome) -> Self {
        Self {
            target: target.into(),
            engagement_id: uuid::Uuid::new_v4().to_string(),
            capability: capability.into(),
            started_at: Local::now(),
            finished_at: None,
            outcome,
            total_probes: 0,
            blocked_atoms: Vec::new(),
        }
    }

    /// Marks the engagement as finished
    pub fn finish(&mut self) {
        self.finished_at = Some(Local::now());
    }
}
