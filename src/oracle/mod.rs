//! Filter oracle: turns live probing into an "allowed" predicate over atoms

pub mod classifier;
pub mod facts;
pub mod rate_limit;
pub mod retry;

use crate::http::{Transport, TransportError};
use crate::models::{Atom, Confidence, Fact, Verdict};
use crate::synth::catalog::{self, ConstructId};
use classifier::{Classify, ProbePurpose};
use facts::{FactMap, FactTable};
use rate_limit::{RateGate, RateLimitState};
use retry::{Clock, RetryPolicy};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{OnceCell, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Tunables for a [`FilterOracle`]
#[derive(Debug, Clone)]
pub struct OracleSettings {
    pub probe_timeout: Duration,
    pub retry: RetryPolicy,
    /// Probes per second; `None` means unlimited
    pub rate_limit: Option<u32>,
    /// Probes in flight at once; 1 disables sibling prefetching
    pub parallelism: usize,
    /// Words tracked as keyword atoms
    pub vocabulary: Vec<String>,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            rate_limit: None,
            parallelism: 4,
            vocabulary: default_vocabulary(),
        }
    }
}

/// Every word used by the construct catalog and the resolver routes
pub fn default_vocabulary() -> Vec<String> {
    let mut words: Vec<String> = catalog::keywords()
        .into_iter()
        .chain(crate::resolver::names().iter().copied())
        .map(str::to_string)
        .collect();
    words.sort();
    words.dedup();
    words
}

/// Final outcome of a probe after retries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Accepted,
    Rejected,
    /// Every attempt was ambiguous; treated as rejected
    FailClosed { attempts: u32, last: String },
}

impl Settlement {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Settlement::Accepted)
    }
}

struct OracleInner {
    transport: Arc<dyn Transport>,
    classifier: Arc<dyn Classify>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    gate: RateGate,
    timeout: Duration,
    workers: Semaphore,
    prefetch_slots: Arc<Semaphore>,
    parallelism: usize,
    facts: FactTable,
    inflight: Mutex<HashMap<Atom, Arc<OnceCell<Fact>>>>,
    vocabulary: Vec<String>,
    probe_count: AtomicU64,
    tasks: TaskTracker,
}

/// Shared handle to one target's filter knowledge
#[derive(Clone)]
pub struct FilterOracle {
    inner: Arc<OracleInner>,
}

impl FilterOracle {
    pub fn new(
        transport: Arc<dyn Transport>,
        classifier: Arc<dyn Classify>,
        clock: Arc<dyn Clock>,
        settings: OracleSettings,
    ) -> Self {
        let parallelism = settings.parallelism.max(1);
        let mut vocabulary = settings.vocabulary;
        vocabulary.retain(|w| !w.is_empty());
        vocabulary.sort();
        vocabulary.dedup();

        Self {
            inner: Arc::new(OracleInner {
                transport,
                classifier,
                gate: RateGate::new(settings.rate_limit, Arc::clone(&clock)),
                clock,
                retry: settings.retry,
                timeout: settings.probe_timeout,
                workers: Semaphore::new(parallelism),
                prefetch_slots: Arc::new(Semaphore::new(parallelism.saturating_sub(1).max(1))),
                parallelism,
                facts: FactTable::new(),
                inflight: Mutex::new(HashMap::new()),
                vocabulary,
                probe_count: AtomicU64::new(0),
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Sends exactly one probe and classifies the response as a filter probe
    pub async fn probe(&self, candidate: &str) -> Verdict {
        self.probe_for(candidate, ProbePurpose::Filter).await
    }

    /// Sends exactly one probe, waiting for a worker slot and the rate gate
    pub async fn probe_for(&self, candidate: &str, purpose: ProbePurpose<'_>) -> Verdict {
        let Ok(_permit) = self.inner.workers.acquire().await else {
            return Verdict::Ambiguous("worker pool closed".to_string());
        };
        self.inner.gate.acquire().await;
        self.inner.probe_count.fetch_add(1, Ordering::Relaxed);

        match self.inner.transport.send(candidate, self.inner.timeout).await {
            Ok(response) => {
                if response.status == 429 {
                    self.inner.gate.throttled();
                }
                let verdict = self.inner.classifier.classify(&response, purpose);
                debug!("Probe {candidate:?} -> {verdict} (status {})", response.status);
                verdict
            }
            Err(TransportError::Unsubmittable(reason)) => {
                debug!("Probe {candidate:?} cannot be submitted: {reason}");
                Verdict::Rejected
            }
            Err(e) => {
                debug!("Probe {candidate:?} failed: {e}");
                Verdict::Ambiguous(e.to_string())
            }
        }
    }

    /// Probes until the verdict is clean, backing off between attempts.
    /// Never settles as accepted without an accepted verdict.
    pub async fn settle(&self, candidate: &str, purpose: ProbePurpose<'_>) -> Settlement {
        let attempts = self.inner.retry.max_attempts.max(1);
        let mut last = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                let backoff = self.inner.retry.backoff(attempt - 1);
                debug!("Retry attempt {attempt} for {candidate:?}, waiting {backoff:?}");
                self.inner.clock.sleep(backoff).await;
            }
            match self.probe_for(candidate, purpose).await {
                Verdict::Accepted => return Settlement::Accepted,
                Verdict::Rejected => return Settlement::Rejected,
                Verdict::Ambiguous(detail) => last = detail,
            }
        }

        warn!("Probe {candidate:?} stayed ambiguous after {attempts} attempts ({last}), treating as blocked");
        Settlement::FailClosed { attempts, last }
    }

    /// Returns what is known about `atom`, probing its carrier on first use.
    ///
    /// Concurrent callers for the same atom share one probe.
    pub async fn learn(&self, atom: &Atom) -> Fact {
        if let Some(fact) = self.inner.facts.get(atom) {
            return fact;
        }
        if let Some(fact) = self.infer(atom) {
            debug!("Inferred {atom} is {:?}", fact.status);
            return self.inner.facts.publish(atom.clone(), fact);
        }

        let cell = {
            let mut inflight = self.inflight();
            Arc::clone(inflight.entry(atom.clone()).or_default())
        };
        let fact = *cell.get_or_init(|| self.discover(atom)).await;

        let mut inflight = self.inflight();
        if inflight.get(atom).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
            inflight.remove(atom);
        }
        fact
    }

    pub async fn is_allowed(&self, atom: &Atom) -> bool {
        self.learn(atom).await.is_allowed()
    }

    /// Known fact for `atom`, without probing
    pub fn known(&self, atom: &Atom) -> Option<Fact> {
        self.inner.facts.get(atom)
    }

    /// Whether every atom the construct consumes is known to be allowed.
    /// Derived from learned facts only; unknown atoms count as not allowed.
    pub fn is_construct_allowed(&self, id: ConstructId) -> bool {
        let construct = catalog::construct(id);
        let facts = self.inner.facts.snapshot();
        let allowed = |atom: &Atom| facts.get(atom).is_some_and(Fact::is_allowed);
        construct.chars.chars().all(|c| allowed(&Atom::Char(c)))
            && construct
                .keywords
                .iter()
                .all(|k| allowed(&Atom::Keyword((*k).to_string())))
    }

    /// Atoms that must be allowed for `text` to appear in a payload:
    /// its distinct characters, the vocabulary words it contains, then the
    /// text itself when longer than one character.
    pub fn text_atoms(&self, text: &str) -> Vec<Atom> {
        let mut atoms: Vec<Atom> = Vec::new();
        for c in text.chars() {
            let atom = Atom::Char(c);
            if !atoms.contains(&atom) {
                atoms.push(atom);
            }
        }
        for word in &self.inner.vocabulary {
            if word.as_str() != text && text.contains(word.as_str()) {
                atoms.push(Atom::Keyword(word.clone()));
            }
        }
        if text.chars().count() >= 2 {
            atoms.push(self.word_atom(text));
        }
        atoms
    }

    /// Keyword atom for vocabulary words, fragment atom otherwise
    pub fn word_atom(&self, text: &str) -> Atom {
        if self.inner.vocabulary.iter().any(|w| w == text) {
            Atom::Keyword(text.to_string())
        } else {
            Atom::Fragment(text.to_string())
        }
    }

    /// Earliest known-blocked keyword or fragment occurring in `text`, as
    /// `(char offset, char length, atom)`
    pub fn blocked_pattern_in(&self, text: &str) -> Option<(usize, usize, Atom)> {
        let facts = self.inner.facts.snapshot();
        facts
            .iter()
            .filter(|(_, fact)| !fact.is_allowed())
            .filter_map(|(atom, _)| match atom {
                Atom::Keyword(p) | Atom::Fragment(p) => {
                    let byte = text.find(p.as_str())?;
                    Some((text[..byte].chars().count(), p.chars().count(), atom.clone()))
                }
                _ => None,
            })
            .min_by(|a, b| (a.0, a.1, &a.2).cmp(&(b.0, b.1, &b.2)))
    }

    /// Marks `text` as blocked regardless of what was known, e.g. after a
    /// rejected confirmation
    pub fn record_blocked_pattern(&self, text: &str) {
        let atom = self.word_atom(text);
        info!("Recording {atom} as blocked");
        self.inner.facts.overwrite(atom, Fact::blocked(Confidence::Confirmed));
    }

    /// Forgets one fact so the next query probes again
    pub fn invalidate(&self, atom: &Atom) -> bool {
        self.inflight().remove(atom);
        self.inner.facts.invalidate(atom)
    }

    /// Forgets everything, e.g. when the target's filter changed
    pub fn invalidate_all(&self) {
        self.inflight().clear();
        self.inner.facts.clear();
    }

    pub fn export_facts(&self) -> FactMap {
        FactMap::clone(&self.inner.facts.snapshot())
    }

    pub fn import_facts(&self, facts: FactMap) {
        self.inflight().clear();
        self.inner.facts.replace_all(facts);
    }

    pub fn rate_limit_state(&self) -> RateLimitState {
        self.inner.gate.snapshot()
    }

    pub fn restore_rate_limit(&self, state: RateLimitState) {
        self.inner.gate.restore(state);
    }

    /// Total probes sent to the target
    pub fn probe_count(&self) -> u64 {
        self.inner.probe_count.load(Ordering::Relaxed)
    }

    pub fn parallelism(&self) -> usize {
        self.inner.parallelism
    }

    /// Passes a side parameter to the transport; false if it has none
    pub fn set_extra_param(&self, key: &str, value: &str) -> bool {
        self.inner.transport.set_extra_param(key, value)
    }

    /// Learns `atoms` in the background. Cancelling `token` stops queued
    /// work; probes already sent run to completion and their facts are kept.
    pub fn prefetch(&self, atoms: Vec<Atom>, token: &CancellationToken) {
        if self.inner.parallelism <= 1 {
            return;
        }
        for atom in atoms {
            if self.known(&atom).is_some() {
                continue;
            }
            let oracle = self.clone();
            let token = token.clone();
            let slots = Arc::clone(&self.inner.prefetch_slots);
            self.inner.tasks.spawn(async move {
                let _permit = tokio::select! {
                    _ = token.cancelled() => return,
                    permit = slots.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };
                if token.is_cancelled() {
                    return;
                }
                oracle.learn(&atom).await;
            });
        }
    }

    /// Waits for every background prefetch to finish
    pub async fn quiesce(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }

    async fn discover(&self, atom: &Atom) -> Fact {
        if let Some(fact) = self.inner.facts.get(atom) {
            return fact;
        }
        let fact = match self.settle(&atom.carrier(), ProbePurpose::Filter).await {
            Settlement::Accepted => Fact::allowed(Confidence::Confirmed),
            Settlement::Rejected => Fact::blocked(Confidence::Confirmed),
            Settlement::FailClosed { .. } => Fact::blocked(Confidence::FailClosed),
        };
        let fact = self.inner.facts.publish(atom.clone(), fact);
        if fact.is_allowed() {
            debug!("Learned {atom} is allowed");
            self.propagate_allowed(atom);
        } else {
            info!("Learned {atom} is blocked ({:?})", fact.confidence);
        }
        fact
    }

    /// Derives a fact for a textual atom from what is already known
    fn infer(&self, atom: &Atom) -> Option<Fact> {
        let text = match atom {
            Atom::Keyword(t) | Atom::Fragment(t) => t,
            Atom::Char(_) | Atom::Delimiter(_) => return None,
        };
        let facts = self.inner.facts.snapshot();
        let char_blocked = text
            .chars()
            .any(|c| facts.get(&Atom::Char(c)).is_some_and(|f| !f.is_allowed()));
        if char_blocked || self.blocked_pattern_in(text).is_some() {
            return Some(Fact::blocked(Confidence::Inferred));
        }
        None
    }

    /// An accepted text vouches for its characters and contained words
    fn propagate_allowed(&self, atom: &Atom) {
        let Some(text) = atom.text() else {
            return;
        };
        if text.chars().count() < 2 {
            return;
        }
        for c in text.chars() {
            self.inner
                .facts
                .publish(Atom::Char(c), Fact::allowed(Confidence::Inferred));
        }
        for word in &self.inner.vocabulary {
            if word.as_str() != text && text.contains(word.as_str()) {
                self.inner
                    .facts
                    .publish(Atom::Keyword(word.clone()), Fact::allowed(Confidence::Inferred));
            }
        }
    }

    fn inflight(&self) -> MutexGuard<'_, HashMap<Atom, Arc<OnceCell<Fact>>>> {
        self.inner.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
