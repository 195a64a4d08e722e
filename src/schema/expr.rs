//! Compiled expressions for guards, computed fields, validation rules and
//! permission predicates.
//!
//! Expressions arrive already parsed as a JSON tree, e.g.
//!
//! ```json
//! { "compare": { "op": "gt", "left": { "field": "end_date" }, "right": { "field": "start_date" } } }
//! ```
//!
//! Evaluation is total: a missing field evaluates to `null`, arithmetic on
//! non-numbers yields `null`, and ordering comparisons between mismatched
//! types are false.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// A compiled expression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Value of a sibling field
    Field(String),
    /// Literal value
    Value(Value),
    /// True when the field is present and not null
    Present(String),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Arith {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// String concatenation of every operand
    Concat(Vec<Expr>),
}

impl Expr {
    pub fn field(name: impl Into<String>) -> Self {
        Expr::Field(name.into())
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Expr::Value(value.into())
    }

    pub fn present(name: impl Into<String>) -> Self {
        Expr::Present(name.into())
    }

    pub fn compare(op: CompareOp, left: Expr, right: Expr) -> Self {
        Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn arith(op: ArithOp, left: Expr, right: Expr) -> Self {
        Expr::Arith {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::compare(CompareOp::Eq, left, right)
    }

    pub fn gt(left: Expr, right: Expr) -> Self {
        Self::compare(CompareOp::Gt, left, right)
    }

    /// Evaluates the expression against a record scope.
    pub fn eval(&self, scope: &Map<String, Value>) -> Value {
        match self {
            Expr::Field(name) => scope.get(name).cloned().unwrap_or(Value::Null),
            Expr::Value(v) => v.clone(),
            Expr::Present(name) => Value::Bool(scope.get(name).map_or(false, |v| !v.is_null())),
            Expr::Not(inner) => Value::Bool(!inner.eval_bool(scope)),
            Expr::And(items) => Value::Bool(items.iter().all(|e| e.eval_bool(scope))),
            Expr::Or(items) => Value::Bool(items.iter().any(|e| e.eval_bool(scope))),
            Expr::Compare { op, left, right } => {
                Value::Bool(compare(*op, &left.eval(scope), &right.eval(scope)))
            }
            Expr::Arith { op, left, right } => arith(*op, &left.eval(scope), &right.eval(scope)),
            Expr::Concat(items) => {
                let mut out = String::new();
                for item in items {
                    match item.eval(scope) {
                        Value::Null => return Value::Null,
                        Value::String(s) => out.push_str(&s),
                        other => out.push_str(&other.to_string()),
                    }
                }
                Value::String(out)
            }
        }
    }

    /// Evaluates the expression and interprets the result as a boolean.
    pub fn eval_bool(&self, scope: &Map<String, Value>) -> bool {
        truthy(&self.eval(scope))
    }

    /// Field names this expression reads.
    pub fn referenced_fields(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Field(name) | Expr::Present(name) => {
                out.insert(name.clone());
            }
            Expr::Value(_) => {}
            Expr::Not(inner) => inner.collect_fields(out),
            Expr::And(items) | Expr::Or(items) | Expr::Concat(items) => {
                for item in items {
                    item.collect_fields(out);
                }
            }
            Expr::Compare { left, right, .. } | Expr::Arith { left, right, .. } => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::Ne => !values_equal(left, right),
        CompareOp::In => right
            .as_array()
            .map_or(false, |items| items.iter().any(|item| values_equal(left, item))),
        CompareOp::Gt => order(left, right) == Some(Ordering::Greater),
        CompareOp::Gte => matches!(order(left, right), Some(Ordering::Greater | Ordering::Equal)),
        CompareOp::Lt => order(left, right) == Some(Ordering::Less),
        CompareOp::Lte => matches!(order(left, right), Some(Ordering::Less | Ordering::Equal)),
    }
}

/// Numbers compare by value so `1` equals `1.0`.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        // Dates and timestamps are normalized to ISO-8601 before rules run,
        // so lexicographic order is chronological order.
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn arith(op: ArithOp, left: &Value, right: &Value) -> Value {
    let (Value::Number(a), Value::Number(b)) = (left, right) else {
        return Value::Null;
    };

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let exact = match op {
            ArithOp::Add => x.checked_add(y),
            ArithOp::Sub => x.checked_sub(y),
            ArithOp::Mul => x.checked_mul(y),
            ArithOp::Div if y != 0 && x % y == 0 => Some(x / y),
            ArithOp::Div => None,
        };
        if let Some(n) = exact {
            return Value::Number(n.into());
        }
    }

    let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
        return Value::Null;
    };
    let result = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div if y == 0.0 => return Value::Null,
        ArithOp::Div => x / y,
    };
    Number::from_f64(result).map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parses_compiled_form() {
        let expr: Expr = serde_json::from_value(json!({
            "compare": { "op": "eq", "left": { "field": "status" }, "right": { "value": "published" } }
        }))
        .unwrap();

        assert!(expr.eval_bool(&scope(json!({ "status": "published" }))));
        assert!(!expr.eval_bool(&scope(json!({ "status": "draft" }))));
    }

    #[test]
    fn test_missing_field_is_null() {
        let expr = Expr::present("discount");
        assert!(!expr.eval_bool(&scope(json!({}))));
        assert_eq!(Expr::field("nope").eval(&scope(json!({}))), Value::Null);
    }

    #[test]
    fn test_integer_arithmetic_stays_integral() {
        let expr = Expr::arith(ArithOp::Mul, Expr::field("price"), Expr::field("quantity"));
        assert_eq!(expr.eval(&scope(json!({ "price": 3, "quantity": 4 }))), json!(12));

        let expr = Expr::arith(ArithOp::Div, Expr::value(7), Expr::value(2));
        assert_eq!(expr.eval(&scope(json!({}))), json!(3.5));
    }

    #[test]
    fn test_division_by_zero_is_null() {
        let expr = Expr::arith(ArithOp::Div, Expr::value(1.5), Expr::value(0));
        assert_eq!(expr.eval(&scope(json!({}))), Value::Null);
    }

    #[test]
    fn test_string_dates_order_chronologically() {
        let expr = Expr::gt(Expr::field("end"), Expr::field("start"));
        assert!(expr.eval_bool(&scope(json!({ "start": "2024-01-31", "end": "2024-02-01" }))));
        assert!(!expr.eval_bool(&scope(json!({ "start": "2024-02-01", "end": "2024-01-31" }))));
    }

    #[test]
    fn test_mismatched_types_do_not_order() {
        let expr = Expr::gt(Expr::value("10"), Expr::value(5));
        assert!(!expr.eval_bool(&scope(json!({}))));
    }

    #[test]
    fn test_referenced_fields() {
        let expr = Expr::And(vec![
            Expr::present("a"),
            Expr::gt(Expr::field("b"), Expr::arith(ArithOp::Add, Expr::field("c"), Expr::value(1))),
        ]);
        let fields: Vec<_> = expr.referenced_fields().into_iter().collect();
        assert_eq!(fields, vec!["a", "b", "c"]);
    }
}
