/// Branch condition evaluation
///
/// A condition compares the value at a context path (`left`) with a literal
/// (`right`). The literal is template-resolved and then parsed as JSON when
/// possible, so `18` compares numerically and `"18"` as text.

use crate::runtime::{
    context::ExecutionContext,
    template::{apply_vars, is_truthy, js_string, js_string_opt, to_number, try_parse},
};
use serde_json::Value;
use std::str::FromStr;

/// Supported comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOp {
    Equals,
    Contains,
    StartsWith,
    GreaterThan,
    Exists,
}

impl FromStr for ConditionOp {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "EQUALS" => Ok(ConditionOp::Equals),
            "CONTAINS" => Ok(ConditionOp::Contains),
            "STARTS_WITH" => Ok(ConditionOp::StartsWith),
            "GT" => Ok(ConditionOp::GreaterThan),
            "EXISTS" => Ok(ConditionOp::Exists),
            _ => Err(()),
        }
    }
}

/// How a list of conditions combines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BranchMode {
    /// Every condition must hold
    #[default]
    All,
    /// At least one condition must hold
    Any,
}

impl BranchMode {
    /// `ANY` selects OR; every other value, including a missing one, is AND
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("ANY") => BranchMode::Any,
            _ => BranchMode::All,
        }
    }
}

/// A single authored condition
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Dotted context path
    pub left: String,
    /// Operator as authored; unknown operators evaluate to false
    pub op: String,
    /// Literal compared against, before template resolution
    pub right: Value,
}

impl Condition {
    pub fn new(left: &str, op: &str, right: impl Into<Value>) -> Self {
        Self {
            left: left.to_string(),
            op: op.to_string(),
            right: right.into(),
        }
    }

    pub fn operator(&self) -> Option<ConditionOp> {
        self.op.parse().ok()
    }

    pub fn evaluate(&self, context: &ExecutionContext) -> bool {
        let Some(op) = self.operator() else {
            return false;
        };

        let left = context.get_path(self.left.trim());
        let right_raw = match &self.right {
            Value::Null => String::new(),
            other => js_string(other),
        };
        let right = try_parse(&apply_vars(&right_raw, context));

        match op {
            ConditionOp::Equals => js_string_opt(left) == js_string(&right),
            ConditionOp::Contains => falsy_to_empty(left).contains(&falsy_to_empty(Some(&right))),
            ConditionOp::StartsWith => {
                falsy_to_empty(left).starts_with(&falsy_to_empty(Some(&right)))
            }
            // NaN on either side compares false
            ConditionOp::GreaterThan => to_number(left) > to_number(Some(&right)),
            ConditionOp::Exists => !matches!(left, None | Some(Value::Null))
                && left != Some(&Value::String(String::new())),
        }
    }
}

fn falsy_to_empty(value: Option<&Value>) -> String {
    if is_truthy(value) {
        js_string_opt(value)
    } else {
        String::new()
    }
}

/// Combine a condition list under a mode
///
/// An empty list holds under `All` and fails under `Any`.
pub fn evaluate_all(conditions: &[Condition], mode: BranchMode, context: &ExecutionContext) -> bool {
    match mode {
        BranchMode::All => conditions.iter().all(|c| c.evaluate(context)),
        BranchMode::Any => conditions.iter().any(|c| c.evaluate(context)),
    }
}

/// Parse the authored `conditions` field
///
/// Accepts a list of `{left, op, right}` objects or the editor's text form with
/// one `left OP right` per line. `right` may contain spaces; a line with only
/// `left OP` has an empty right side.
pub fn parse_conditions(block: Option<&Value>) -> Vec<Condition> {
    match block {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let left = item.get("left").map(js_string)?;
                let op = item.get("op").map(js_string).unwrap_or_default();
                let right = item.get("right").cloned().unwrap_or(Value::Null);
                Some(Condition { left, op, right })
            })
            .collect(),
        Some(Value::String(text)) => text.lines().filter_map(parse_condition_line).collect(),
        _ => Vec::new(),
    }
}

fn parse_condition_line(line: &str) -> Option<Condition> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (left, rest) = line.split_once(char::is_whitespace)?;
    let rest = rest.trim_start();
    let (op, right) = match rest.split_once(char::is_whitespace) {
        Some((op, right)) => (op, right.trim()),
        None => (rest, ""),
    };
    if op.is_empty() {
        return None;
    }
    Some(Condition {
        left: left.to_string(),
        op: op.to_string(),
        right: Value::String(right.to_string()),
    })
}
