//! Turning a (construct, goal) pair into concrete slots to fill

use crate::models::Atom;
use crate::oracle::FilterOracle;
use crate::synth::catalog::{construct, ConstructId, REPR_SOURCES};
use crate::synth::expr::Precedence;
use crate::synth::goal::{attr, call, Goal};
use crate::synth::Deps;

/// Words Jinja2 treats as operators or constants; never usable as names
const RESERVED: &[&str] = &[
    "and", "or", "not", "in", "is", "if", "else", "true", "false", "none", "True", "False", "None",
];

/// Characters tried, in order, as padding for `IntLength`
const FILLERS: &str = "xyzqa";

/// Longest padding `IntLength` will build
const MAX_LENGTH_FILL: u64 = 40;

/// One hole of a construct's template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    /// Text pasted verbatim; its atoms must all be allowed
    Raw(String),
    /// A sub-goal whose expression must bind at least as tightly as `min`
    Sub { goal: Goal, min: Precedence },
}

/// A construct instantiated for one goal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub construct: ConstructId,
    pub slots: Vec<Slot>,
    /// Atoms needed beyond the construct's own (e.g. argument commas)
    pub extra: Vec<Atom>,
}

impl Plan {
    fn new(construct: ConstructId, slots: Vec<Slot>) -> Self {
        Self {
            construct,
            slots,
            extra: Vec::new(),
        }
    }
}

fn sub(goal: Goal, min: Precedence) -> Slot {
    Slot::Sub { goal, min }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED.contains(&name)
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 18
        && s.bytes().all(|b| b.is_ascii_digit())
        && (s == "0" || !s.starts_with('0'))
}

/// Whether `id` can produce `goal` at all, independent of the filter
pub fn applies(id: ConstructId, goal: &Goal) -> bool {
    if construct(id).tag != goal.tag() {
        return false;
    }
    use ConstructId as C;
    match (id, goal) {
        (C::StrTokens, Goal::Str(_)) => true,
        (C::StrTildeConcat | C::StrPlusConcat | C::StrJoinTuple, Goal::Str(s)) => s.chars().count() >= 2,
        (C::StrDictJoin, Goal::Str(s)) => is_identifier(s),
        (C::StrLowerFilter, Goal::Str(s)) => {
            let upper = s.to_uppercase();
            upper != *s && upper.to_lowercase() == *s
        }
        (C::StrReverseFilter, Goal::Str(s)) => s.chars().rev().collect::<String>() != *s,
        (C::StrFromInt, Goal::Str(s)) => is_decimal(s),
        (C::StrCharFormat, Goal::Str(s)) => s.chars().count() == 1,
        (C::StrCharFromRepr, Goal::Str(s)) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => REPR_SOURCES.iter().any(|(_, repr)| repr.contains(c)),
                _ => false,
            }
        }
        (C::TokenSingleQuote, Goal::Token(t)) => !t.contains(['\'', '\\', '\n', '\r']),
        (C::TokenDoubleQuote, Goal::Token(t)) => !t.contains(['"', '\\', '\n', '\r']),
        (C::TokenAdjacent, Goal::Token(t)) => t.chars().count() >= 2,
        (C::IntLiteral, Goal::Int(_)) => true,
        (C::IntAdd, Goal::Int(n)) => *n >= 2,
        (C::IntLength, Goal::Int(n)) => (1..=MAX_LENGTH_FILL).contains(n),
        (C::GlobalName, Goal::Global(name)) => is_identifier(name),
        (C::AttrDot, Goal::Attr { name, .. }) => is_identifier(name),
        (
            C::AttrSubscript | C::AttrFilter | C::AttrFilterComma | C::AttrMapFirst | C::AttrMapLast,
            Goal::Attr { .. },
        ) => true,
        (C::ItemDot, Goal::Item { key, .. }) => is_identifier(key),
        (C::ItemSubscript | C::ItemGetCall | C::ItemDunderGetitem, Goal::Item { .. }) => true,
        (C::CallParen, Goal::Call { .. }) => true,
        _ => false,
    }
}

/// Concrete plans for `id` on `goal`, in preference order. May consult
/// the oracle; every fact consulted is recorded in `deps`.
pub async fn plans(id: ConstructId, goal: &Goal, oracle: &FilterOracle, deps: &mut Deps) -> Vec<Plan> {
    if !applies(id, goal) {
        return Vec::new();
    }
    use ConstructId as C;
    use Precedence as P;

    let plan = match (id, goal) {
        (C::StrTokens, Goal::Str(s)) => Plan::new(id, vec![sub(Goal::Token(s.clone()), P::Sum)]),
        (C::StrTildeConcat, Goal::Str(s)) => {
            let (a, b) = split(s, oracle, deps).await;
            Plan::new(id, vec![sub(Goal::Str(a), P::Concat), sub(Goal::Str(b), P::Product)])
        }
        (C::StrPlusConcat, Goal::Str(s)) => {
            let (a, b) = split(s, oracle, deps).await;
            Plan::new(id, vec![sub(Goal::Str(a), P::Sum), sub(Goal::Str(b), P::Concat)])
        }
        (C::StrJoinTuple, Goal::Str(s)) => {
            let (a, b) = split(s, oracle, deps).await;
            Plan::new(id, vec![sub(Goal::Str(a), P::Sum), sub(Goal::Str(b), P::Sum)])
        }
        (C::StrDictJoin, Goal::Str(s)) => Plan::new(id, vec![Slot::Raw(s.clone())]),
        (C::StrLowerFilter, Goal::Str(s)) => Plan::new(id, vec![sub(Goal::Str(s.to_uppercase()), P::Filter)]),
        (C::StrReverseFilter, Goal::Str(s)) => {
            Plan::new(id, vec![sub(Goal::Str(s.chars().rev().collect()), P::Filter)])
        }
        (C::StrFromInt, Goal::Str(s)) => match s.parse::<u64>() {
            Ok(n) => Plan::new(id, vec![sub(Goal::Int(n), P::Filter)]),
            Err(_) => return Vec::new(),
        },
        (C::StrCharFormat, Goal::Str(s)) => match s.chars().next() {
            Some(c) => Plan::new(id, vec![sub(Goal::Int(u64::from(u32::from(c))), P::Filter)]),
            None => return Vec::new(),
        },
        (C::StrCharFromRepr, Goal::Str(s)) => {
            let Some(c) = s.chars().next() else {
                return Vec::new();
            };
            return REPR_SOURCES
                .iter()
                .filter_map(|(name, repr)| {
                    let index = repr.chars().position(|r| r == c)?;
                    Some(Plan::new(
                        id,
                        vec![
                            sub(Goal::Global((*name).to_string()), P::Filter),
                            sub(Goal::Int(index as u64), P::Sum),
                        ],
                    ))
                })
                .collect();
        }
        (C::TokenSingleQuote | C::TokenDoubleQuote, Goal::Token(t)) => Plan::new(id, vec![Slot::Raw(t.clone())]),
        (C::TokenAdjacent, Goal::Token(t)) => {
            let (a, b) = split(t, oracle, deps).await;
            Plan::new(id, vec![sub(Goal::Token(a), P::Primary), sub(Goal::Token(b), P::Primary)])
        }
        (C::IntLiteral, Goal::Int(n)) => Plan::new(id, vec![Slot::Raw(n.to_string())]),
        (C::IntAdd, Goal::Int(n)) => {
            let Some(a) = largest_expressible_below(*n, oracle, deps).await else {
                return Vec::new();
            };
            Plan::new(id, vec![sub(Goal::Int(a), P::Sum), sub(Goal::Int(n - a), P::Concat)])
        }
        (C::IntLength, Goal::Int(n)) => {
            let Some(filler) = first_allowed(FILLERS, oracle, deps).await else {
                return Vec::new();
            };
            let padding: String = std::iter::repeat(filler).take(*n as usize).collect();
            Plan::new(id, vec![sub(Goal::Str(padding), P::Filter)])
        }
        (C::GlobalName, Goal::Global(name)) => Plan::new(id, vec![Slot::Raw(name.clone())]),
        (C::AttrDot, Goal::Attr { base, name }) | (C::ItemDot, Goal::Item { base, key: name }) => {
            Plan::new(id, vec![sub((**base).clone(), P::Postfix), Slot::Raw(name.clone())])
        }
        (C::AttrSubscript, Goal::Attr { base, name }) | (C::ItemSubscript, Goal::Item { base, key: name }) => {
            Plan::new(id, vec![sub((**base).clone(), P::Postfix), sub(Goal::Str(name.clone()), P::Sum)])
        }
        (C::AttrFilter | C::AttrFilterComma, Goal::Attr { base, name }) => {
            Plan::new(id, vec![sub((**base).clone(), P::Filter), sub(Goal::Str(name.clone()), P::Sum)])
        }
        (C::AttrMapFirst | C::AttrMapLast, Goal::Attr { base, name }) => Plan::new(
            id,
            vec![
                sub((**base).clone(), P::Sum),
                sub(Goal::Str("attr".to_string()), P::Sum),
                sub(Goal::Str(name.clone()), P::Sum),
            ],
        ),
        (C::ItemGetCall, Goal::Item { base, key }) => Plan::new(
            id,
            vec![sub(call(attr((**base).clone(), "get"), vec![Goal::Str(key.clone())]), P::Sum)],
        ),
        (C::ItemDunderGetitem, Goal::Item { base, key }) => Plan::new(
            id,
            vec![sub(
                call(attr((**base).clone(), "__getitem__"), vec![Goal::Str(key.clone())]),
                P::Sum,
            )],
        ),
        (C::CallParen, Goal::Call { callee, args }) => {
            let mut slots = vec![sub((**callee).clone(), P::Postfix)];
            slots.extend(args.iter().map(|a| sub(a.clone(), P::Sum)));
            let mut plan = Plan::new(id, slots);
            if args.len() > 1 {
                plan.extra.push(Atom::Char(','));
            }
            plan
        }
        _ => return Vec::new(),
    };
    vec![plan]
}

/// Splits `text` into two non-empty halves
async fn split(text: &str, oracle: &FilterOracle, deps: &mut Deps) -> (String, String) {
    let cut = split_point(text, oracle, deps).await;
    let a: String = text.chars().take(cut).collect();
    let b: String = text.chars().skip(cut).collect();
    (a, b)
}

/// Where to cut `text` (a char index in `1..len`) so that each half is
/// more likely to pass the filter than the whole:
/// isolate a blocked leading character, else end the leading run of
/// allowed characters, else cut through the middle of the first known
/// blocked pattern, else halve.
pub async fn split_point(text: &str, oracle: &FilterOracle, deps: &mut Deps) -> usize {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if len < 2 {
        return len;
    }

    let mut run = 0;
    for c in &chars {
        let atom = Atom::Char(*c);
        let allowed = oracle.is_allowed(&atom).await;
        deps.insert(atom, allowed);
        if !allowed {
            break;
        }
        run += 1;
    }

    if run == 0 {
        return 1;
    }
    if run < len {
        return run;
    }
    if let Some((start, pattern_len, atom)) = oracle.blocked_pattern_in(text) {
        deps.insert(atom, false);
        return (start + pattern_len / 2).clamp(1, len - 1);
    }
    len / 2
}

/// Largest `m < n` written only with allowed digits
async fn largest_expressible_below(n: u64, oracle: &FilterOracle, deps: &mut Deps) -> Option<u64> {
    let limit = n.checked_sub(1)?;
    let mut allowed = [false; 10];
    for (digit, slot) in ('0'..='9').zip(allowed.iter_mut()) {
        let atom = Atom::Char(digit);
        *slot = oracle.is_allowed(&atom).await;
        deps.insert(atom, *slot);
    }
    largest_with_digits(limit, &allowed)
}

/// Largest `1 <= m <= limit` whose decimal digits are all in `allowed`.
///
/// Keeps the longest allowed prefix of `limit`, lowers the last digit
/// that can be lowered, and fills the rest with the largest allowed
/// digit; failing that, drops to one digit fewer.
fn largest_with_digits(limit: u64, allowed: &[bool; 10]) -> Option<u64> {
    if limit == 0 {
        return None;
    }
    let ok = |d: u8| allowed[usize::from(d)];
    let max = (0..10u8).rev().find(|d| ok(*d))?;
    let digits: Vec<u8> = limit.to_string().bytes().map(|b| b - b'0').collect();

    let Some(first_bad) = digits.iter().position(|d| !ok(*d)) else {
        return Some(limit);
    };
    for i in (0..=first_bad).rev() {
        let floor = u8::from(i == 0);
        if let Some(lower) = (floor..digits[i]).rev().find(|d| ok(*d)) {
            let mut out = digits[..i].to_vec();
            out.push(lower);
            out.resize(digits.len(), max);
            return Some(to_number(&out));
        }
    }

    if digits.len() < 2 || max == 0 {
        return None;
    }
    Some(to_number(&vec![max; digits.len() - 1]))
}

fn to_number(digits: &[u8]) -> u64 {
    digits.iter().fold(0, |n, d| n * 10 + u64::from(*d))
}

async fn first_allowed(candidates: &str, oracle: &FilterOracle, deps: &mut Deps) -> Option<char> {
    for c in candidates.chars() {
        let atom = Atom::Char(c);
        let ok = oracle.is_allowed(&atom).await;
        deps.insert(atom, ok);
        if ok {
            return Some(c);
        }
    }
    None
}
