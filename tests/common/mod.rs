//! Common test utilities: a simulated filtered target and session helpers

#![allow(dead_code)]

pub mod jinja;

use async_trait::async_trait;
use daedalus::http::{Transport, TransportError, TransportResponse};
use daedalus::models::TemplateEnvironment;
use daedalus::oracle::classifier::MarkerClassifier;
use daedalus::oracle::retry::{FakeClock, RetryPolicy};
use daedalus::oracle::OracleSettings;
use daedalus::session::{Session, SessionSettings};
use daedalus::synth::SearchBudget;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CARRIERS: [&str; 2] = ["{{7}}", "{%print(7)%}"];

#[derive(Debug, Default)]
struct Rules {
    blocked_chars: HashSet<char>,
    blocked_words: Vec<String>,
    blocked_combos: Vec<Vec<String>>,
    timeouts: HashSet<String>,
    throttle_next: usize,
    never_render: bool,
    echo_only: bool,
}

/// In-memory stand-in for a WAF-protected Jinja endpoint.
///
/// Blocks any payload containing a listed character or word, or every
/// word of a listed combination. Everything else renders as
/// `Hello <output>`.
#[derive(Debug, Default)]
pub struct SimulatedTarget {
    rules: Mutex<Rules>,
    log: Mutex<Vec<String>>,
    extra_params: Mutex<Vec<(String, String)>>,
}

impl SimulatedTarget {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn block_chars(&self, chars: &str) {
        self.rules.lock().unwrap().blocked_chars.extend(chars.chars());
    }

    pub fn block_words(&self, words: &[&str]) {
        let mut rules = self.rules.lock().unwrap();
        rules
            .blocked_words
            .extend(words.iter().map(|w| w.to_string()));
    }

    /// Blocks payloads containing all of `words` at once
    pub fn block_combo(&self, words: &[&str]) {
        let combo = words.iter().map(|w| w.to_string()).collect();
        self.rules.lock().unwrap().blocked_combos.push(combo);
    }

    pub fn time_out_on(&self, payload: &str) {
        self.rules.lock().unwrap().timeouts.insert(payload.to_string());
    }

    /// Answers the next `n` requests with 429
    pub fn throttle_next(&self, n: usize) {
        self.rules.lock().unwrap().throttle_next = n;
    }

    /// Makes every non-carrier template payload fail to render
    pub fn never_render(&self) {
        self.rules.lock().unwrap().never_render = true;
    }

    /// Makes the page show template payloads as text instead of rendering them
    pub fn echo_only(&self) {
        self.rules.lock().unwrap().echo_only = true;
    }

    /// Side parameters set through the transport, in order
    pub fn extra_params(&self) -> Vec<(String, String)> {
        self.extra_params.lock().unwrap().clone()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn requests(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    /// Payloads sent as full template expressions, excluding delimiter probes
    pub fn confirmations(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|p| is_template(p) && !CARRIERS.contains(&p.as_str()))
            .collect()
    }

    /// Whether the filter would let `text` through
    pub fn accepts(&self, text: &str) -> bool {
        !Self::is_blocked(&self.rules.lock().unwrap(), text)
    }

    fn is_blocked(rules: &Rules, payload: &str) -> bool {
        payload.chars().any(|c| rules.blocked_chars.contains(&c))
            || rules.blocked_words.iter().any(|w| payload.contains(w.as_str()))
            || rules
                .blocked_combos
                .iter()
                .any(|combo| combo.iter().all(|w| payload.contains(w.as_str())))
    }
}

fn is_template(payload: &str) -> bool {
    payload.starts_with("{{") || payload.starts_with("{%")
}

/// What the page shows for `payload`
fn render(payload: &str) -> String {
    let expr = payload
        .strip_prefix("{{")
        .and_then(|p| p.strip_suffix("}}"))
        .or_else(|| {
            payload
                .strip_prefix("{%print(")
                .and_then(|p| p.strip_suffix(")%}"))
        });
    match expr {
        Some(expr) => jinja::eval_str(expr).unwrap_or_else(|| "<object>".to_string()),
        None => payload.to_string(),
    }
}

#[async_trait]
impl Transport for SimulatedTarget {
    async fn send(&self, payload: &str, timeout: Duration) -> Result<TransportResponse, TransportError> {
        self.log.lock().unwrap().push(payload.to_string());
        let mut rules = self.rules.lock().unwrap();

        if rules.throttle_next > 0 {
            rules.throttle_next -= 1;
            return Ok(TransportResponse::new(429, "Too Many Requests"));
        }
        if rules.timeouts.contains(payload) {
            return Err(TransportError::Timeout(timeout));
        }
        if Self::is_blocked(&rules, payload) {
            return Ok(TransportResponse::new(403, "Blocked by WAF"));
        }
        if rules.never_render && is_template(payload) && !CARRIERS.contains(&payload) {
            return Ok(TransportResponse::new(
                500,
                "jinja2.exceptions.UndefinedError: 'x' is undefined",
            ));
        }
        if rules.echo_only {
            return Ok(TransportResponse::new(200, format!("<p>Hello {payload}</p>")));
        }
        Ok(TransportResponse::new(200, format!("<p>Hello {}</p>", render(payload))))
    }

    fn set_extra_param(&self, key: &str, value: &str) -> bool {
        self.extra_params
            .lock()
            .unwrap()
            .push((key.to_string(), value.to_string()));
        true
    }
}

/// Sequential, unthrottled settings with a fast retry schedule
pub fn settings(environment: TemplateEnvironment) -> SessionSettings {
    SessionSettings {
        budget: SearchBudget::default(),
        environment,
        oracle: OracleSettings {
            retry: RetryPolicy::default().with_initial_backoff(Duration::from_millis(10)),
            rate_limit: None,
            parallelism: 1,
            ..OracleSettings::default()
        },
        arg_param: None,
    }
}

pub fn session_with(
    target: &Arc<SimulatedTarget>,
    clock: Arc<FakeClock>,
    settings: SessionSettings,
) -> Session {
    Session::with_clock(
        "http://simulated.local/#name",
        target.clone(),
        Arc::new(MarkerClassifier::default()),
        clock,
        settings,
    )
}

pub fn session(target: &Arc<SimulatedTarget>, environment: TemplateEnvironment) -> Session {
    session_with(target, Arc::new(FakeClock::new()), settings(environment))
}
