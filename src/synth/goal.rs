//! Sub-problems the synthesizer solves

use crate::synth::catalog::ValueTag;
use std::fmt;

/// A value the synthesizer must express using allowed constructs only
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Goal {
    /// An expression evaluating to this string
    Str(String),
    /// Quoted string literal text, possibly split across adjacent literals
    Token(String),
    /// An expression evaluating to this integer
    Int(u64),
    /// A global name of the template context
    Global(String),
    /// `base.name`, or anything equivalent
    Attr { base: Box<Goal>, name: String },
    /// `base[key]` on a mapping, or anything equivalent
    Item { base: Box<Goal>, key: String },
    /// `callee(args...)`
    Call { callee: Box<Goal>, args: Vec<Goal> },
}

pub fn global(name: &str) -> Goal {
    Goal::Global(name.to_string())
}

pub fn string(value: &str) -> Goal {
    Goal::Str(value.to_string())
}

pub fn attr(base: Goal, name: &str) -> Goal {
    Goal::Attr {
        base: Box::new(base),
        name: name.to_string(),
    }
}

pub fn item(base: Goal, key: &str) -> Goal {
    Goal::Item {
        base: Box::new(base),
        key: key.to_string(),
    }
}

pub fn call(callee: Goal, args: Vec<Goal>) -> Goal {
    Goal::Call {
        callee: Box::new(callee),
        args,
    }
}

impl Goal {
    /// Kind of value the goal produces, selecting the catalog section
    pub fn tag(&self) -> ValueTag {
        match self {
            Goal::Str(_) => ValueTag::String,
            Goal::Token(_) => ValueTag::StringToken,
            Goal::Int(_) => ValueTag::Integer,
            Goal::Global(_) => ValueTag::Global,
            Goal::Attr { .. } => ValueTag::Attribute,
            Goal::Item { .. } => ValueTag::Item,
            Goal::Call { .. } => ValueTag::CallResult,
        }
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Goal::Str(s) => write!(f, "str {s:?}"),
            Goal::Token(s) => write!(f, "literal {s:?}"),
            Goal::Int(n) => write!(f, "int {n}"),
            Goal::Global(name) => write!(f, "{name}"),
            Goal::Attr { base, name } => write!(f, "{}.{name}", Plain(base)),
            Goal::Item { base, key } => write!(f, "{}[{key:?}]", Plain(base)),
            Goal::Call { callee, args } => {
                write!(f, "{}(", Plain(callee))?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", Plain(arg))?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Renders nested goals the way they would read as template source
struct Plain<'a>(&'a Goal);

impl fmt::Display for Plain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Goal::Str(s) | Goal::Token(s) => write!(f, "{s:?}"),
            Goal::Int(n) => write!(f, "{n}"),
            other => write!(f, "{other}"),
        }
    }
}
