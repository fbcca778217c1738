//! Synthesized expressions and template rendering

use crate::synth::catalog::ConstructId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binding strength of a Jinja2 expression, weakest first.
///
/// Mirrors the parser's levels: `+`/`-`, then `~`, then `*`/`%`, then
/// filters, then postfix access (`.x`, `[x]`, `(...)`), then atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Precedence {
    Sum,
    Concat,
    Product,
    Filter,
    Postfix,
    Primary,
}

/// A template expression built only from allowed constructs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Expression {
    pub text: String,
    pub precedence: Precedence,
    /// Outermost construct
    pub root: ConstructId,
    /// Every construct used, outermost first
    pub constructs: Vec<ConstructId>,
}

impl Expression {
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn uses(&self, id: ConstructId) -> bool {
        self.constructs.contains(&id)
    }

    /// The same expression in parentheses
    pub fn wrapped(&self) -> Expression {
        let mut constructs = Vec::with_capacity(self.constructs.len() + 1);
        constructs.push(ConstructId::Parens);
        constructs.extend_from_slice(&self.constructs);
        Expression {
            text: format!("({})", self.text),
            precedence: Precedence::Primary,
            root: ConstructId::Parens,
            constructs,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Fills `{N}` holes with `parts[N]` and `{args}` with `parts[1..]`
/// joined by commas. Other text is copied as is.
pub fn render(template: &str, parts: &[String]) -> String {
    let mut out = String::with_capacity(template.len() + parts.iter().map(String::len).sum::<usize>());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let hole = &after[..close];
        if hole == "args" {
            out.push_str(&parts.get(1..).unwrap_or_default().join(","));
        } else if let Some(part) = hole.parse::<usize>().ok().and_then(|i| parts.get(i)) {
            out.push_str(part);
        } else {
            out.push('{');
            out.push_str(hole);
            out.push('}');
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_render_numbered_holes() {
        assert_eq!(render("{0}~{1}", &parts(&["'a'", "'b'"])), "'a'~'b'");
        assert_eq!(render("({0}|string)[{1}]", &parts(&["lipsum", "11"])), "(lipsum|string)[11]");
        assert_eq!(render("'%c'%{0}", &parts(&["101"])), "'%c'%101");
    }

    #[test]
    fn test_render_args_hole() {
        assert_eq!(render("{0}({args})", &parts(&["f", "1", "'x'"])), "f(1,'x')");
        assert_eq!(render("{0}({args})", &parts(&["f"])), "f()");
    }

    #[test]
    fn test_precedence_order_follows_parser() {
        assert!(Precedence::Sum < Precedence::Concat);
        assert!(Precedence::Concat < Precedence::Product);
        assert!(Precedence::Filter < Precedence::Postfix);
    }
}
