//! Tiny evaluator for the string and integer subset of Jinja expressions
//! that synthesized payloads use. Anything outside that subset yields `None`.

use daedalus::synth::catalog::REPR_SOURCES;

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Int(i64),
    Tuple(Vec<Value>),
    Dict(Vec<String>),
    Global(&'static str),
}

impl Value {
    fn to_text(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Int(n) => n.to_string(),
            Value::Tuple(items) => {
                let inner: Vec<String> = items.iter().map(Value::repr).collect();
                if items.len() == 1 {
                    format!("({},)", inner[0])
                } else {
                    format!("({})", inner.join(", "))
                }
            }
            Value::Dict(keys) => {
                let inner: Vec<String> = keys.iter().map(|k| format!("'{k}': 1")).collect();
                format!("{{{}}}", inner.join(", "))
            }
            Value::Global(name) => global_repr(name),
        }
    }

    fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{s}'"),
            other => other.to_text(),
        }
    }
}

fn global_repr(name: &str) -> String {
    match REPR_SOURCES.iter().find(|(n, _)| *n == name) {
        Some((_, prefix)) if name == "lipsum" => format!("{prefix}7f3a2c1d0e50>"),
        Some((_, repr)) => repr.to_string(),
        None => format!("<{name}>"),
    }
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
}

/// Renders `expr` the way Jinja would print it, if it is in the subset
pub fn eval_str(expr: &str) -> Option<String> {
    let mut parser = Parser {
        src: expr.as_bytes(),
        pos: 0,
    };
    let value = parser.sum()?;
    (parser.pos == parser.src.len()).then(|| value.to_text())
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, byte: u8) -> Option<()> {
        self.eat(byte).then_some(())
    }

    fn sum(&mut self) -> Option<Value> {
        let mut left = self.concat()?;
        while self.eat(b'+') {
            let right = self.concat()?;
            left = match (left, right) {
                (Value::Int(a), Value::Int(b)) => Value::Int(a + b),
                (Value::Str(a), Value::Str(b)) => Value::Str(a + &b),
                _ => return None,
            };
        }
        Some(left)
    }

    fn concat(&mut self) -> Option<Value> {
        let mut left = self.product()?;
        while self.eat(b'~') {
            let right = self.product()?;
            left = Value::Str(left.to_text() + &right.to_text());
        }
        Some(left)
    }

    fn product(&mut self) -> Option<Value> {
        let mut left = self.filtered()?;
        while self.eat(b'%') {
            let right = self.filtered()?;
            left = match (&left, right) {
                (Value::Str(f), Value::Int(n)) if f == "%c" => {
                    Value::Str(char::from_u32(u32::try_from(n).ok()?)?.to_string())
                }
                (Value::Str(f), arg) if f == "%s" => Value::Str(arg.to_text()),
                _ => return None,
            };
        }
        Some(left)
    }

    fn filtered(&mut self) -> Option<Value> {
        let mut value = self.postfix()?;
        while self.eat(b'|') {
            let name = self.ident()?;
            value = apply_filter(&name, value)?;
        }
        Some(value)
    }

    fn postfix(&mut self) -> Option<Value> {
        let mut value = self.primary()?;
        while self.eat(b'[') {
            let index = self.sum()?;
            self.expect(b']')?;
            let Value::Int(i) = index else {
                return None;
            };
            let i = usize::try_from(i).ok()?;
            value = match value {
                Value::Str(s) => Value::Str(s.chars().nth(i)?.to_string()),
                Value::Tuple(items) => items.into_iter().nth(i)?,
                _ => return None,
            };
        }
        Some(value)
    }

    fn primary(&mut self) -> Option<Value> {
        match self.peek()? {
            b'\'' | b'"' => {
                let mut text = String::new();
                while let Some(q @ (b'\'' | b'"')) = self.peek() {
                    self.pos += 1;
                    let start = self.pos;
                    while self.peek()? != q {
                        self.pos += 1;
                    }
                    text.push_str(std::str::from_utf8(&self.src[start..self.pos]).ok()?);
                    self.pos += 1;
                }
                Some(Value::Str(text))
            }
            b'0'..=b'9' => {
                let start = self.pos;
                while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                    self.pos += 1;
                }
                std::str::from_utf8(&self.src[start..self.pos])
                    .ok()?
                    .parse()
                    .ok()
                    .map(Value::Int)
            }
            b'(' => {
                self.pos += 1;
                let first = self.sum()?;
                if self.eat(b')') {
                    return Some(first);
                }
                let mut items = vec![first];
                while self.eat(b',') {
                    if self.peek() == Some(b')') {
                        break;
                    }
                    items.push(self.sum()?);
                }
                self.expect(b')')?;
                Some(Value::Tuple(items))
            }
            _ => {
                let name = self.ident()?;
                if name == "dict" && self.eat(b'(') {
                    let mut keys = Vec::new();
                    while !self.eat(b')') {
                        keys.push(self.ident()?);
                        self.expect(b'=')?;
                        self.sum()?;
                        self.eat(b',');
                    }
                    return Some(Value::Dict(keys));
                }
                REPR_SOURCES
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map(|(n, _)| Value::Global(*n))
            }
        }
    }

    fn ident(&mut self) -> Option<String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.pos += 1;
        }
        (self.pos > start)
            .then(|| String::from_utf8_lossy(&self.src[start..self.pos]).into_owned())
    }
}

fn apply_filter(name: &str, value: Value) -> Option<Value> {
    Some(match (name, value) {
        ("lower", Value::Str(s)) => Value::Str(s.to_lowercase()),
        ("upper", Value::Str(s)) => Value::Str(s.to_uppercase()),
        ("reverse", Value::Str(s)) => Value::Str(s.chars().rev().collect()),
        ("string", v) => Value::Str(v.to_text()),
        ("length", Value::Str(s)) => Value::Int(s.chars().count() as i64),
        ("length", Value::Tuple(items)) => Value::Int(items.len() as i64),
        ("length", Value::Dict(keys)) => Value::Int(keys.len() as i64),
        ("join", Value::Str(s)) => Value::Str(s),
        ("join", Value::Tuple(items)) => {
            Value::Str(items.iter().map(Value::to_text).collect::<String>())
        }
        ("join", Value::Dict(keys)) => Value::Str(keys.concat()),
        ("first", Value::Str(s)) => Value::Str(s.chars().next()?.to_string()),
        ("first", Value::Tuple(items)) => items.into_iter().next()?,
        _ => return None,
    })
}
