//! Per-target engagement state: the oracle, the synthesis cache and
//! settings, with optional persistence of learned facts

use crate::error::{DaedalusError, Result};
use crate::http::{HttpTransport, Transport};
use crate::models::{EngagementConfig, TemplateEnvironment};
use crate::oracle::classifier::{Classify, MarkerClassifier};
use crate::oracle::facts::PersistedFacts;
use crate::oracle::retry::{Clock, TokioClock};
use crate::oracle::{FilterOracle, OracleSettings};
use crate::synth::expr::Expression;
use crate::synth::goal::Goal;
use crate::synth::{Deps, SearchBudget};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything tunable about one engagement
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub budget: SearchBudget,
    pub environment: TemplateEnvironment,
    pub oracle: OracleSettings,
    /// Side parameter that call arguments may be read from (Flask only)
    pub arg_param: Option<String>,
}

impl SessionSettings {
    pub fn from_config(config: &EngagementConfig) -> Self {
        Self {
            budget: config.budget,
            environment: config.environment,
            oracle: OracleSettings {
                probe_timeout: Duration::from_secs(config.timeout_secs.max(1)),
                retry: config.retry.clone(),
                rate_limit: config.rate_limit,
                parallelism: config.threads.max(1),
                ..OracleSettings::default()
            },
            arg_param: config.arg_param.clone(),
        }
    }
}

/// Cached synthesis result for one goal
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// `None` records that the goal was infeasible
    pub expression: Option<Expression>,
    pub dead_ends: Vec<String>,
    /// Facts the result was derived from
    pub deps: Deps,
}

/// What happened when loading persisted facts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restore {
    /// Facts loaded
    Loaded(usize),
    /// No file yet
    Missing,
    /// File failed validation; the session starts empty
    Corrupt(String),
    /// File belongs to another target; ignored
    ForeignTarget(String),
}

pub struct Session {
    target: String,
    oracle: FilterOracle,
    cache: Mutex<HashMap<Goal, CacheEntry>>,
    settings: SessionSettings,
}

impl Session {
    pub fn new(
        target: impl Into<String>,
        transport: Arc<dyn Transport>,
        classifier: Arc<dyn Classify>,
        settings: SessionSettings,
    ) -> Self {
        Self::with_clock(target, transport, classifier, Arc::new(TokioClock::new()), settings)
    }

    pub fn with_clock(
        target: impl Into<String>,
        transport: Arc<dyn Transport>,
        classifier: Arc<dyn Classify>,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
    ) -> Self {
        let oracle = FilterOracle::new(transport, classifier, clock, settings.oracle.clone());
        Self {
            target: target.into(),
            oracle,
            cache: Mutex::new(HashMap::new()),
            settings,
        }
    }

    /// Session against a live HTTP target
    pub fn from_config(config: &EngagementConfig) -> Result<Self> {
        let transport = HttpTransport::from_config(config)?;
        let classifier = MarkerClassifier::new(config.classifier.clone());
        Ok(Self::new(
            target_identity(config),
            Arc::new(transport),
            Arc::new(classifier),
            SessionSettings::from_config(config),
        ))
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn oracle(&self) -> &FilterOracle {
        &self.oracle
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Cached result for `goal`, if every fact it relied on still holds
    pub fn lookup(&self, goal: &Goal) -> Option<CacheEntry> {
        let mut cache = self.cache();
        let entry = cache.get(goal)?;

        let facts_hold = entry
            .deps
            .iter()
            .all(|(atom, allowed)| self.oracle.known(atom).map(|f| f.is_allowed()) == Some(*allowed));
        let text_clean = entry
            .expression
            .as_ref()
            .map_or(true, |e| self.oracle.blocked_pattern_in(&e.text).is_none());

        if facts_hold && text_clean {
            return Some(entry.clone());
        }
        debug!("Dropping stale cache entry for {goal}");
        cache.remove(goal);
        None
    }

    pub fn store(&self, goal: Goal, entry: CacheEntry) {
        self.cache().insert(goal, entry);
    }

    pub fn cached_goals(&self) -> usize {
        self.cache().len()
    }

    /// Forgets all learned facts and cached results
    pub fn invalidate_all(&self) {
        info!("Invalidating all filter knowledge for {}", self.target);
        self.oracle.invalidate_all();
        self.cache().clear();
    }

    /// Writes learned facts and rate-limit state to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        let persisted = PersistedFacts::from_map(
            &self.target,
            &self.oracle.export_facts(),
            self.oracle.rate_limit_state(),
        );
        let json = serde_json::to_string_pretty(&persisted)?;
        std::fs::write(path, json)?;
        info!("Saved {} facts to {}", persisted.facts.len(), path.display());
        Ok(())
    }

    /// Loads facts saved by [`Session::save`]. A corrupt file resets the
    /// session to empty knowledge instead of failing.
    pub fn restore(&self, path: &Path) -> Result<Restore> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Restore::Missing),
            Err(e) => return Err(e.into()),
        };

        let persisted = match parse_persisted(&content) {
            Ok(persisted) => persisted,
            Err(e) => return Ok(self.reset_corrupt(e)),
        };
        if persisted.target != self.target {
            warn!(
                "Session file {} belongs to {}, ignoring it",
                path.display(),
                persisted.target
            );
            return Ok(Restore::ForeignTarget(persisted.target));
        }

        let rate_limit = persisted.rate_limit;
        let facts = match persisted.into_map() {
            Ok(facts) => facts,
            Err(e) => return Ok(self.reset_corrupt(DaedalusError::SessionCorrupt(e))),
        };

        let count = facts.len();
        self.cache().clear();
        self.oracle.import_facts(facts);
        self.oracle.restore_rate_limit(rate_limit);
        info!("Restored {count} facts from {}", path.display());
        Ok(Restore::Loaded(count))
    }

    fn reset_corrupt(&self, error: DaedalusError) -> Restore {
        warn!("{error}; starting with empty filter knowledge");
        self.invalidate_all();
        Restore::Corrupt(error.to_string())
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<Goal, CacheEntry>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn parse_persisted(content: &str) -> Result<PersistedFacts> {
    serde_json::from_str(content).map_err(|e| DaedalusError::SessionCorrupt(e.to_string()))
}

/// Identity persisted facts are keyed by
pub fn target_identity(config: &EngagementConfig) -> String {
    if config.param.is_empty() {
        config.target.clone()
    } else {
        format!("{}#{}", config.target, config.param)
    }
}
