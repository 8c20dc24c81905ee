use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde_json::Value;

use crate::error::{EngineError, Result};

/// A readiness rule evaluated against a live object.
///
/// Grammar: one or more clauses joined by `&&`. A clause is either
/// `path op operand` with `op` one of `== != >= <= > <`, or a bare `path`
/// that must be truthy. Paths are dotted with optional indexes
/// (`status.conditions[0].status`); operands are a number, a quoted string,
/// `true`, `false`, `null`, or another path.
///
/// ```text
/// status.readyReplicas == spec.replicas && status.phase == "Running"
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct HealthExpression {
    source: String,
    clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq)]
enum Clause {
    Truthy(String),
    Compare {
        path: String,
        op: Op,
        operand: Operand,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Literal(Value),
    Path(String),
}

const PATH_PATTERN: &str = r"[A-Za-z_][\w-]*(?:\[\d+\])*(?:\.[A-Za-z_][\w-]*(?:\[\d+\])*)*";

impl HealthExpression {
    pub fn parse(source: &str) -> Result<Self> {
        let invalid = |reason: String| {
            EngineError::Validation(format!("invalid health expression '{}': {}", source, reason))
        };
        let path_re = Regex::new(&format!("^{}$", PATH_PATTERN)).map_err(|e| invalid(e.to_string()))?;
        let clause_re = Regex::new(&format!(r"^({})\s*(==|!=|>=|<=|>|<)\s*(.+)$", PATH_PATTERN))
            .map_err(|e| invalid(e.to_string()))?;

        let mut clauses = Vec::new();
        for raw in source.split("&&") {
            let text = raw.trim();
            if text.is_empty() {
                return Err(invalid("empty clause".to_string()));
            }
            if let Some(caps) = clause_re.captures(text) {
                let op = match &caps[2] {
                    "==" => Op::Eq,
                    "!=" => Op::Ne,
                    ">=" => Op::Ge,
                    "<=" => Op::Le,
                    ">" => Op::Gt,
                    _ => Op::Lt,
                };
                let operand = parse_operand(caps[3].trim(), &path_re)
                    .ok_or_else(|| invalid(format!("cannot read operand '{}'", caps[3].trim())))?;
                clauses.push(Clause::Compare {
                    path: caps[1].to_string(),
                    op,
                    operand,
                });
            } else if path_re.is_match(text) {
                clauses.push(Clause::Truthy(text.to_string()));
            } else {
                return Err(invalid(format!("cannot parse clause '{}'", text)));
            }
        }

        Ok(Self {
            source: source.trim().to_string(),
            clauses,
        })
    }

    /// True when every clause holds for `object`. Missing paths read as null.
    pub fn evaluate(&self, object: &Value) -> bool {
        self.clauses.iter().all(|clause| match clause {
            Clause::Truthy(path) => truthy(lookup(object, path).unwrap_or(&Value::Null)),
            Clause::Compare { path, op, operand } => {
                let left = lookup(object, path).unwrap_or(&Value::Null);
                let right = match operand {
                    Operand::Literal(v) => v,
                    Operand::Path(p) => lookup(object, p).unwrap_or(&Value::Null),
                };
                compare(left, *op, right)
            }
        })
    }
}

impl FromStr for HealthExpression {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for HealthExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn parse_operand(text: &str, path_re: &Regex) -> Option<Operand> {
    let quoted = |q: char| text.len() >= 2 && text.starts_with(q) && text.ends_with(q);
    if quoted('"') || quoted('\'') {
        return Some(Operand::Literal(Value::String(text[1..text.len() - 1].to_string())));
    }
    match text {
        "true" => return Some(Operand::Literal(Value::Bool(true))),
        "false" => return Some(Operand::Literal(Value::Bool(false))),
        "null" => return Some(Operand::Literal(Value::Null)),
        _ => {}
    }
    if let Ok(n) = text.parse::<i64>() {
        return Some(Operand::Literal(Value::from(n)));
    }
    if let Ok(n) = text.parse::<f64>() {
        return serde_json::Number::from_f64(n).map(|n| Operand::Literal(Value::Number(n)));
    }
    if path_re.is_match(text) {
        return Some(Operand::Path(text.to_string()));
    }
    None
}

/// Resolve a dotted path with optional `[n]` indexes.
pub fn lookup<'a>(object: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = object;
    for segment in path.split('.') {
        let (key, indexes) = match segment.find('[') {
            Some(pos) => (&segment[..pos], &segment[pos..]),
            None => (segment, ""),
        };
        current = current.get(key)?;
        for index in indexes.split('[').filter(|s| !s.is_empty()) {
            let i: usize = index.trim_end_matches(']').parse().ok()?;
            current = current.get(i)?;
        }
    }
    Some(current)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty() && s != "False" && s != "false",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn compare(left: &Value, op: Op, right: &Value) -> bool {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    match op {
        Op::Eq => ordering.map(|o| o == Ordering::Equal).unwrap_or(left == right),
        Op::Ne => ordering.map(|o| o != Ordering::Equal).unwrap_or(left != right),
        Op::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        Op::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        Op::Gt => matches!(ordering, Some(Ordering::Greater)),
        Op::Lt => matches!(ordering, Some(Ordering::Less)),
    }
}
