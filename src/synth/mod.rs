//! Expression synthesizer: a backtracking search over the construct
//! catalog, driven by an explicit stack of frames.
//!
//! Each frame owns one goal. Its applicable constructs are grouped into
//! tiers by catalog score; every candidate of a tier is resolved and the
//! shortest wins, so the first tier with any success decides the result.
//! Sub-goals are pushed as new frames and their outcome is handed back to
//! the parent when they pop.

pub mod catalog;
pub mod expr;
pub mod goal;
pub mod plan;

use crate::models::Atom;
use crate::oracle::FilterOracle;
use crate::session::{CacheEntry, Session};
use catalog::{catalog_rank, construct, list_constructs, ConstructId};
use expr::{render, Expression, Precedence};
use goal::Goal;
use plan::{Plan, Slot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Atoms consulted while solving a goal, with the allowance seen
pub type Deps = BTreeMap<Atom, bool>;

/// Bounds on a single synthesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchBudget {
    /// Deepest sub-goal nesting explored; deeper branches are pruned
    pub max_depth: usize,
    /// Frames explored before the search is aborted
    pub max_nodes: usize,
}

impl Default for SearchBudget {
    fn default() -> Self {
        Self {
            max_depth: 40,
            max_nodes: 4_000,
        }
    }
}

/// No expression exists under current filter knowledge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Infeasibility {
    pub goal: String,
    /// Sub-goals for which no construct could even be attempted
    pub dead_ends: Vec<String>,
    pub nodes: usize,
}

/// The search gave up before deciding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetReport {
    pub goal: String,
    pub nodes: usize,
    /// Whether branches were pruned by `max_depth`
    pub depth_limited: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Synthesis {
    Found(Expression),
    Infeasible(Infeasibility),
    BudgetExceeded(BudgetReport),
}

impl Synthesis {
    pub fn expression(&self) -> Option<&Expression> {
        match self {
            Synthesis::Found(expr) => Some(expr),
            _ => None,
        }
    }
}

/// Result of one frame, passed up to its parent
#[derive(Debug, Clone)]
enum Outcome {
    Found { expr: Expression, deps: Deps },
    /// `tainted` failures were cut short by a cycle or the depth bound and
    /// say nothing definitive about the goal
    Failed { tainted: bool, deps: Deps },
}

impl Outcome {
    fn deps(&self) -> &Deps {
        match self {
            Outcome::Found { deps, .. } | Outcome::Failed { deps, .. } => deps,
        }
    }
}

enum Step {
    Need(Goal),
    Done(Outcome),
}

/// A plan being filled slot by slot
struct Candidate {
    plan: Plan,
    parts: Vec<String>,
    constructs: Vec<ConstructId>,
    first_precedence: Option<Precedence>,
    failed: bool,
}

impl Candidate {
    fn new(plan: Plan) -> Self {
        Self {
            constructs: vec![plan.construct],
            parts: Vec::with_capacity(plan.slots.len()),
            plan,
            first_precedence: None,
            failed: false,
        }
    }

    fn current_slot(&self) -> Option<&Slot> {
        self.plan.slots.get(self.parts.len())
    }

    fn push(&mut self, text: String, precedence: Precedence, constructs: &[ConstructId]) {
        if self.parts.is_empty() {
            self.first_precedence = Some(precedence);
        }
        self.parts.push(text);
        self.constructs.extend_from_slice(constructs);
    }

    fn into_expression(self) -> Expression {
        let c = construct(self.plan.construct);
        let precedence = c
            .precedence
            .or(self.first_precedence)
            .unwrap_or(Precedence::Primary);
        Expression {
            text: render(c.template, &self.parts),
            precedence,
            root: self.plan.construct,
            constructs: self.constructs,
        }
    }
}

struct Frame {
    goal: Goal,
    depth: usize,
    tiers: VecDeque<Vec<ConstructId>>,
    pending: VecDeque<ConstructId>,
    queue: VecDeque<Plan>,
    current: Option<Candidate>,
    found: Vec<Expression>,
    deps: Deps,
    tainted: bool,
    child_failed: bool,
    token: CancellationToken,
    /// Root frames searched with exclusions are never cached
    uncacheable: bool,
}

impl Frame {
    fn new(goal: Goal, depth: usize, exclude: &[ConstructId]) -> Self {
        let mut tiers: VecDeque<Vec<ConstructId>> = VecDeque::new();
        let mut last_score = None;
        for c in list_constructs(goal.tag()) {
            if exclude.contains(&c.id) || !plan::applies(c.id, &goal) {
                continue;
            }
            match tiers.back_mut() {
                Some(tier) if last_score == Some(c.score) => tier.push(c.id),
                _ => tiers.push_back(vec![c.id]),
            }
            last_score = Some(c.score);
        }
        Self {
            goal,
            depth,
            tiers,
            pending: VecDeque::new(),
            queue: VecDeque::new(),
            current: None,
            found: Vec::new(),
            deps: Deps::new(),
            tainted: false,
            child_failed: false,
            token: CancellationToken::new(),
            uncacheable: !exclude.is_empty(),
        }
    }

    async fn atoms_allowed(&mut self, atoms: &[Atom], oracle: &FilterOracle) -> bool {
        for atom in atoms {
            let allowed = oracle.is_allowed(atom).await;
            self.deps.insert(atom.clone(), allowed);
            if !allowed {
                return false;
            }
        }
        true
    }

    /// Takes a finished sub-goal into the current candidate
    async fn absorb(&mut self, outcome: Outcome, oracle: &FilterOracle) {
        self.deps.extend(outcome.deps().iter().map(|(a, v)| (a.clone(), *v)));
        let min = match self.current.as_ref().and_then(Candidate::current_slot) {
            Some(Slot::Sub { min, .. }) => *min,
            _ => return,
        };

        match outcome {
            Outcome::Found { expr, .. } => {
                let expr = if expr.precedence < min {
                    let parens = [Atom::Char('('), Atom::Char(')')];
                    if !self.atoms_allowed(&parens, oracle).await {
                        if let Some(candidate) = self.current.as_mut() {
                            candidate.failed = true;
                        }
                        return;
                    }
                    expr.wrapped()
                } else {
                    expr
                };
                if let Some(candidate) = self.current.as_mut() {
                    candidate.push(expr.text, expr.precedence, &expr.constructs);
                }
            }
            Outcome::Failed { tainted, .. } => {
                self.tainted |= tainted;
                self.child_failed = true;
                if let Some(candidate) = self.current.as_mut() {
                    candidate.failed = true;
                }
            }
        }
    }

    /// Advances until a sub-goal is needed or the frame is decided
    async fn step(&mut self, oracle: &FilterOracle) -> Step {
        loop {
            if let Some(candidate) = self.current.as_ref() {
                if candidate.failed {
                    self.current = None;
                    continue;
                }
                match candidate.current_slot().cloned() {
                    Some(Slot::Sub { goal, .. }) => return Step::Need(goal),
                    Some(Slot::Raw(text)) => {
                        let atoms = oracle.text_atoms(&text);
                        let ok = self.atoms_allowed(&atoms, oracle).await;
                        if let Some(candidate) = self.current.as_mut() {
                            if ok {
                                candidate.push(text, Precedence::Primary, &[]);
                            } else {
                                candidate.failed = true;
                            }
                        }
                        continue;
                    }
                    None => {
                        if let Some(candidate) = self.current.take() {
                            self.complete(candidate, oracle);
                        }
                        continue;
                    }
                }
            }

            if let Some(plan) = self.queue.pop_front() {
                self.current = Some(Candidate::new(plan));
                continue;
            }

            if let Some(id) = self.pending.pop_front() {
                self.expand(id, oracle).await;
                continue;
            }

            if !self.found.is_empty() {
                self.token.cancel();
                let found = std::mem::take(&mut self.found);
                if let Some(best) = found
                    .into_iter()
                    .min_by_key(|e| (e.len(), catalog_rank(e.root)))
                {
                    debug!("{} => {}", self.goal, best.text);
                    return Step::Done(Outcome::Found {
                        expr: best,
                        deps: std::mem::take(&mut self.deps),
                    });
                }
            }

            if let Some(tier) = self.tiers.pop_front() {
                self.enter_tier(tier, oracle);
                continue;
            }

            self.token.cancel();
            debug!("{} has no expression", self.goal);
            return Step::Done(Outcome::Failed {
                tainted: self.tainted,
                deps: std::mem::take(&mut self.deps),
            });
        }
    }

    fn enter_tier(&mut self, tier: Vec<ConstructId>, oracle: &FilterOracle) {
        if tier.len() > 1 {
            let atoms: Vec<Atom> = tier.iter().flat_map(|id| construct_atoms(*id)).collect();
            oracle.prefetch(atoms, &self.token);
        }
        self.pending = tier.into();
    }

    /// Checks a construct's own atoms and queues its plans
    async fn expand(&mut self, id: ConstructId, oracle: &FilterOracle) {
        let atoms = construct_atoms(id);
        if !self.atoms_allowed(&atoms, oracle).await || !oracle.is_construct_allowed(id) {
            debug!("{id} unavailable for {}", self.goal);
            return;
        }
        let plans = plan::plans(id, &self.goal, oracle, &mut self.deps).await;
        for plan in plans {
            let extra = plan.extra.clone();
            if self.atoms_allowed(&extra, oracle).await {
                self.queue.push_back(plan);
            }
        }
    }

    /// Renders a filled candidate and keeps it if no known blocked
    /// pattern occurs in the text
    fn complete(&mut self, candidate: Candidate, oracle: &FilterOracle) {
        let expr = candidate.into_expression();
        if let Some((_, _, atom)) = oracle.blocked_pattern_in(&expr.text) {
            debug!("{} contains blocked {atom}", expr.text);
            self.deps.insert(atom, false);
            return;
        }
        self.found.push(expr);
    }
}

/// Characters and keywords a construct's template consumes
fn construct_atoms(id: ConstructId) -> Vec<Atom> {
    let c = construct(id);
    c.chars
        .chars()
        .map(Atom::Char)
        .chain(c.keywords.iter().map(|k| Atom::Keyword((*k).to_string())))
        .collect()
}

#[derive(Default)]
struct SearchState {
    memo: HashMap<Goal, Outcome>,
    nodes: usize,
    depth_limited: bool,
    dead_ends: BTreeSet<String>,
}

/// Synthesizes expressions against one session's filter knowledge
pub struct Synthesizer<'s> {
    session: &'s Session,
}

impl<'s> Synthesizer<'s> {
    pub fn new(session: &'s Session) -> Self {
        Self { session }
    }

    pub async fn synthesize(&self, goal: &Goal, budget: SearchBudget) -> Synthesis {
        self.synthesize_excluding(goal, budget, &[]).await
    }

    /// Like [`Synthesizer::synthesize`], but the root goal may not use the
    /// `exclude`d constructs. Bypasses the cache for the root goal.
    pub async fn synthesize_excluding(
        &self,
        goal: &Goal,
        budget: SearchBudget,
        exclude: &[ConstructId],
    ) -> Synthesis {
        let oracle = self.session.oracle();

        if exclude.is_empty() {
            if let Some(entry) = self.session.lookup(goal) {
                debug!("Cache hit for {goal}");
                return match entry.expression {
                    Some(expr) => Synthesis::Found(expr),
                    None => Synthesis::Infeasible(Infeasibility {
                        goal: goal.to_string(),
                        dead_ends: entry.dead_ends,
                        nodes: 0,
                    }),
                };
            }
        }

        let mut state = SearchState {
            nodes: 1,
            ..Default::default()
        };
        let mut stack = vec![Frame::new(goal.clone(), 0, exclude)];
        let mut returned: Option<Outcome> = None;

        while let Some(top) = stack.last_mut() {
            if let Some(outcome) = returned.take() {
                top.absorb(outcome, oracle).await;
            }

            match top.step(oracle).await {
                Step::Need(sub) => {
                    let depth = top.depth + 1;
                    if let Some(outcome) = self.immediate(&sub, depth, &stack, &mut state, budget) {
                        returned = Some(outcome);
                        continue;
                    }
                    state.nodes += 1;
                    if state.nodes > budget.max_nodes {
                        for frame in &stack {
                            frame.token.cancel();
                        }
                        info!("Search for {goal} exceeded {} nodes", budget.max_nodes);
                        return Synthesis::BudgetExceeded(BudgetReport {
                            goal: goal.to_string(),
                            nodes: state.nodes,
                            depth_limited: state.depth_limited,
                        });
                    }
                    stack.push(Frame::new(sub, depth, &[]));
                }
                Step::Done(outcome) => {
                    let Some(frame) = stack.pop() else {
                        break;
                    };
                    self.record(&frame, &outcome, &mut state);
                    if stack.is_empty() {
                        return self.conclude(goal, outcome, state);
                    }
                    returned = Some(outcome);
                }
            }
        }

        Synthesis::Infeasible(Infeasibility {
            goal: goal.to_string(),
            dead_ends: state.dead_ends.into_iter().collect(),
            nodes: state.nodes,
        })
    }

    /// Resolves a sub-goal without a new frame when possible
    fn immediate(
        &self,
        goal: &Goal,
        depth: usize,
        stack: &[Frame],
        state: &mut SearchState,
        budget: SearchBudget,
    ) -> Option<Outcome> {
        if let Some(outcome) = state.memo.get(goal) {
            return Some(outcome.clone());
        }
        if let Some(entry) = self.session.lookup(goal) {
            return Some(match entry.expression {
                Some(expr) => Outcome::Found {
                    expr,
                    deps: entry.deps,
                },
                None => Outcome::Failed {
                    tainted: false,
                    deps: entry.deps,
                },
            });
        }
        if stack.iter().any(|f| f.goal == *goal) {
            return Some(Outcome::Failed {
                tainted: true,
                deps: Deps::new(),
            });
        }
        if depth > budget.max_depth {
            state.depth_limited = true;
            return Some(Outcome::Failed {
                tainted: true,
                deps: Deps::new(),
            });
        }
        None
    }

    fn record(&self, frame: &Frame, outcome: &Outcome, state: &mut SearchState) {
        if let Outcome::Failed { .. } = outcome {
            if !frame.child_failed {
                state.dead_ends.insert(frame.goal.to_string());
            }
        }
        if frame.tainted {
            return;
        }
        state.memo.insert(frame.goal.clone(), outcome.clone());
        if frame.uncacheable {
            return;
        }
        let entry = match outcome {
            Outcome::Found { expr, deps } => CacheEntry {
                expression: Some(expr.clone()),
                dead_ends: Vec::new(),
                deps: deps.clone(),
            },
            Outcome::Failed { deps, .. } => CacheEntry {
                expression: None,
                dead_ends: if frame.depth == 0 {
                    state.dead_ends.iter().cloned().collect()
                } else {
                    Vec::new()
                },
                deps: deps.clone(),
            },
        };
        self.session.store(frame.goal.clone(), entry);
    }

    fn conclude(&self, goal: &Goal, outcome: Outcome, state: SearchState) -> Synthesis {
        match outcome {
            Outcome::Found { expr, .. } => {
                info!("Synthesized {goal} as {} ({} nodes)", expr.text, state.nodes);
                Synthesis::Found(expr)
            }
            Outcome::Failed { .. } if state.depth_limited => {
                info!("Search for {goal} hit the depth limit");
                Synthesis::BudgetExceeded(BudgetReport {
                    goal: goal.to_string(),
                    nodes: state.nodes,
                    depth_limited: true,
                })
            }
            Outcome::Failed { .. } => {
                info!("No expression for {goal} ({} nodes)", state.nodes);
                Synthesis::Infeasible(Infeasibility {
                    goal: goal.to_string(),
                    dead_ends: state.dead_ends.into_iter().collect(),
                    nodes: state.nodes,
                })
            }
        }
    }
}
