//! Learned filter facts: snapshot reads, serialized writes

use crate::models::{Atom, Fact};
use crate::oracle::rate_limit::RateLimitState;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

/// Format version of [`PersistedFacts`]
pub const FACTS_FORMAT_VERSION: u32 = 1;

pub type FactMap = HashMap<Atom, Fact>;

/// Copy-on-write table of facts.
///
/// Readers clone the current `Arc` and never block on writers for longer
/// than the pointer swap. Writers rebuild the map and publish a new
/// snapshot.
#[derive(Debug, Default)]
pub struct FactTable {
    current: RwLock<Arc<FactMap>>,
}

impl FactTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<FactMap> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn get(&self, atom: &Atom) -> Option<Fact> {
        self.snapshot().get(atom).copied()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records `fact` unless the atom is already known. Returns the fact
    /// that is in effect afterwards.
    pub fn publish(&self, atom: Atom, fact: Fact) -> Fact {
        self.update(|map| *map.entry(atom).or_insert(fact))
    }

    /// Records `fact`, replacing whatever was known
    pub fn overwrite(&self, atom: Atom, fact: Fact) {
        self.update(|map| {
            map.insert(atom, fact);
        });
    }

    pub fn invalidate(&self, atom: &Atom) -> bool {
        if !self.snapshot().contains_key(atom) {
            return false;
        }
        self.update(|map| map.remove(atom).is_some())
    }

    pub fn replace_all(&self, facts: FactMap) {
        if let Ok(mut guard) = self.current.write() {
            *guard = Arc::new(facts);
        }
    }

    pub fn clear(&self) {
        self.replace_all(FactMap::new());
    }

    fn update<R>(&self, f: impl FnOnce(&mut FactMap) -> R) -> R {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = FactMap::clone(&guard);
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }
}

/// On-disk form of a session's filter knowledge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedFacts {
    pub version: u32,
    /// Target identity the facts were learned against
    pub target: String,
    pub saved_at: DateTime<Local>,
    /// Atom id to learned fact
    pub facts: BTreeMap<String, Fact>,
    #[serde(default)]
    pub rate_limit: RateLimitState,
}

impl PersistedFacts {
    pub fn from_map(target: &str, facts: &FactMap, rate_limit: RateLimitState) -> Self {
        Self {
            version: FACTS_FORMAT_VERSION,
            target: target.to_string(),
            saved_at: Local::now(),
            facts: facts.iter().map(|(atom, fact)| (atom.id(), *fact)).collect(),
            rate_limit,
        }
    }

    /// Converts back to a fact map, rejecting unknown versions and atom ids
    pub fn into_map(self) -> std::result::Result<FactMap, String> {
        if self.version != FACTS_FORMAT_VERSION {
            return Err(format!("unsupported format version {}", self.version));
        }
        self.facts
            .into_iter()
            .map(|(id, fact)| {
                Atom::from_id(&id)
                    .map(|atom| (atom, fact))
                    .ok_or_else(|| format!("invalid atom id {id:?}"))
            })
            .collect()
    }
}
