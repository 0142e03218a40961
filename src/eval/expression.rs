use core::fmt;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EvalError, EvalResult};
use crate::ast::{Expression, KeyPath, Literal, Operator};
use crate::config::EvaluatorConfig;
use crate::context::Context;

// 値の型システム
#[derive(Clone, Debug, PartialEq, Default, Deserialize, Serialize)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    /// Names another context key; dotted-path traversal resolves through it.
    Reference(String),
    #[default]
    Null,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&Literal> for Value {
    fn from(literal: &Literal) -> Self {
        match literal {
            Literal::Integer(i) => Value::Integer(*i),
            Literal::Float(f) => Value::Float(*f),
            Literal::String(s) => Value::String(s.clone()),
            Literal::Boolean(b) => Value::Boolean(*b),
            Literal::DateTime(dt) => Value::DateTime(*dt),
            Literal::List(items) => Value::List(items.iter().map(Value::from).collect()),
            Literal::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), Value::from(value)))
                    .collect(),
            ),
            Literal::Null => Value::Null,
        }
    }
}

impl TryFrom<&Value> for Literal {
    type Error = EvalError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        Ok(match value {
            Value::Integer(i) => Literal::Integer(*i),
            Value::Float(f) => Literal::Float(*f),
            Value::String(s) => Literal::String(s.clone()),
            Value::Boolean(b) => Literal::Boolean(*b),
            Value::DateTime(dt) => Literal::DateTime(*dt),
            Value::List(items) => Literal::List(
                items
                    .iter()
                    .map(Literal::try_from)
                    .collect::<EvalResult<Vec<_>>>()?,
            ),
            Value::Map(entries) => Literal::Map(
                entries
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), Literal::try_from(value)?)))
                    .collect::<EvalResult<_>>()?,
            ),
            Value::Null => Literal::Null,
            Value::Reference(key) => {
                return Err(EvalError::Type(format!(
                    "reference to {} cannot be carried as a literal",
                    key
                )))
            }
        })
    }
}

/// Interprets expressions against a context snapshot. Stateless apart from its
/// limits; safe to share.
pub struct ExpressionEvaluator {
    config: EvaluatorConfig,
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self {
            config: EvaluatorConfig::default(),
        }
    }

    pub fn with_config(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    /// Evaluate `expr` against `context`. Pure: the context is never mutated,
    /// and equal inputs produce equal results.
    pub fn evaluate(&self, expr: &Expression, context: &Context) -> EvalResult<Value> {
        self.eval_expression(expr, context, 0)
    }

    fn eval_expression(
        &self,
        expr: &Expression,
        context: &Context,
        depth: usize,
    ) -> EvalResult<Value> {
        if depth >= self.config.max_expression_depth {
            return Err(EvalError::DepthExceeded {
                limit: self.config.max_expression_depth,
            });
        }
        match expr {
            Expression::Literal(literal) => Ok(Value::from(literal)),
            Expression::Eval(path) => self.eval_path(path, context),
            Expression::Op { op, args } => self.eval_op(*op, args, context, depth),
        }
    }

    // 変数の評価
    /// Dotted-path resolution: each segment indexes into the prior result, and
    /// a [`Value::Reference`] is looked up through the context before indexing
    /// continues (relational traversal).
    fn eval_path(&self, path: &KeyPath, context: &Context) -> EvalResult<Value> {
        let unresolved = || EvalError::UnresolvedVariable {
            path: path.to_string(),
        };
        let mut segments = path.segments().iter();
        let first = segments.next().ok_or_else(unresolved)?;
        let mut current = context.get(first).cloned().ok_or_else(unresolved)?;
        for segment in segments {
            if let Value::Reference(key) = &current {
                current = context.get(key).cloned().ok_or_else(unresolved)?;
            }
            current = match &current {
                Value::Map(map) => map.get(segment.as_str()).cloned().ok_or_else(unresolved)?,
                _ => return Err(unresolved()),
            };
        }
        Ok(current)
    }

    fn eval_op(
        &self,
        op: Operator,
        args: &[Expression],
        context: &Context,
        depth: usize,
    ) -> EvalResult<Value> {
        // Operands evaluate left to right before the operator applies.
        let mut operands = Vec::with_capacity(args.len());
        for arg in args {
            operands.push(self.eval_expression(arg, context, depth + 1)?);
        }
        match op {
            Operator::Add => {
                exactly(op, &operands, 2)?;
                self.eval_add(&operands[0], &operands[1])
            }
            Operator::Subtract => {
                exactly(op, &operands, 2)?;
                self.eval_subtract(&operands[0], &operands[1])
            }
            Operator::Multiply => {
                exactly(op, &operands, 2)?;
                self.eval_multiply(&operands[0], &operands[1])
            }
            Operator::Divide => {
                exactly(op, &operands, 2)?;
                self.eval_divide(&operands[0], &operands[1])
            }
            Operator::Equal => {
                exactly(op, &operands, 2)?;
                Ok(Value::Boolean(values_equal(&operands[0], &operands[1])))
            }
            Operator::NotEqual => {
                exactly(op, &operands, 2)?;
                Ok(Value::Boolean(!values_equal(&operands[0], &operands[1])))
            }
            Operator::LessThan => self.compare_values(op, &operands, |ordering| ordering.is_lt()),
            Operator::GreaterThan => {
                self.compare_values(op, &operands, |ordering| ordering.is_gt())
            }
            Operator::LessThanEqual => {
                self.compare_values(op, &operands, |ordering| ordering.is_le())
            }
            Operator::GreaterThanEqual => {
                self.compare_values(op, &operands, |ordering| ordering.is_ge())
            }
            Operator::And => {
                at_least(op, &operands, 2)?;
                let mut result = true;
                for operand in &operands {
                    result = result && self.strict_bool(op, operand)?;
                }
                Ok(Value::Boolean(result))
            }
            Operator::Or => {
                at_least(op, &operands, 2)?;
                let mut result = false;
                for operand in &operands {
                    result = result || self.strict_bool(op, operand)?;
                }
                Ok(Value::Boolean(result))
            }
            Operator::Not => {
                exactly(op, &operands, 1)?;
                Ok(Value::Boolean(!self.strict_bool(op, &operands[0])?))
            }
            Operator::Bool => {
                exactly(op, &operands, 1)?;
                Ok(Value::Boolean(truthy(&operands[0])))
            }
            Operator::In => {
                exactly(op, &operands, 2)?;
                self.eval_in(&operands[0], &operands[1])
            }
            Operator::If => {
                exactly(op, &operands, 3)?;
                if self.strict_bool(op, &operands[0])? {
                    Ok(operands[1].clone())
                } else {
                    Ok(operands[2].clone())
                }
            }
        }
    }

    fn eval_add(&self, left: &Value, right: &Value) -> EvalResult<Value> {
        match (left, right) {
            (Value::Integer(l), Value::Integer(r)) => Ok(Value::Integer(l + r)),
            (Value::Float(l), Value::Float(r)) => Ok(Value::Float(l + r)),
            (Value::Integer(l), Value::Float(r)) => Ok(Value::Float(*l as f64 + r)),
            (Value::Float(l), Value::Integer(r)) => Ok(Value::Float(l + *r as f64)),
            (Value::String(l), Value::String(r)) => Ok(Value::String(l.clone() + r)),
            _ => Err(EvalError::Type(format!("{:?} + {:?}", left, right))),
        }
    }

    fn eval_subtract(&self, left: &Value, right: &Value) -> EvalResult<Value> {
        match (left, right) {
            (Value::Integer(l), Value::Integer(r)) => Ok(Value::Integer(l - r)),
            (Value::Float(l), Value::Float(r)) => Ok(Value::Float(l - r)),
            (Value::Integer(l), Value::Float(r)) => Ok(Value::Float(*l as f64 - r)),
            (Value::Float(l), Value::Integer(r)) => Ok(Value::Float(l - *r as f64)),
            _ => Err(EvalError::Type(format!("{:?} - {:?}", left, right))),
        }
    }

    fn eval_multiply(&self, left: &Value, right: &Value) -> EvalResult<Value> {
        match (left, right) {
            (Value::Integer(l), Value::Integer(r)) => Ok(Value::Integer(l * r)),
            (Value::Float(l), Value::Float(r)) => Ok(Value::Float(l * r)),
            (Value::Integer(l), Value::Float(r)) => Ok(Value::Float(*l as f64 * r)),
            (Value::Float(l), Value::Integer(r)) => Ok(Value::Float(l * *r as f64)),
            _ => Err(EvalError::Type(format!("{:?} * {:?}", left, right))),
        }
    }

    fn eval_divide(&self, left: &Value, right: &Value) -> EvalResult<Value> {
        match (left, right) {
            (Value::Integer(l), Value::Integer(r)) => {
                if *r == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                Ok(Value::Float(*l as f64 / *r as f64))
            }
            (Value::Float(l), Value::Float(r)) => Ok(Value::Float(l / r)),
            (Value::Integer(l), Value::Float(r)) => Ok(Value::Float(*l as f64 / r)),
            (Value::Float(l), Value::Integer(r)) => Ok(Value::Float(l / *r as f64)),
            _ => Err(EvalError::Type(format!("{:?} / {:?}", left, right))),
        }
    }

    fn eval_in(&self, needle: &Value, haystack: &Value) -> EvalResult<Value> {
        match haystack {
            Value::List(items) => Ok(Value::Boolean(items.contains(needle))),
            Value::String(s) => match needle {
                Value::String(sub) => Ok(Value::Boolean(s.contains(sub.as_str()))),
                _ => Err(EvalError::Type(format!("{:?} in {:?}", needle, haystack))),
            },
            Value::Map(map) => match needle {
                Value::String(key) => Ok(Value::Boolean(map.contains_key(key.as_str()))),
                _ => Err(EvalError::Type(format!("{:?} in {:?}", needle, haystack))),
            },
            _ => Err(EvalError::Type(format!("{:?} in {:?}", needle, haystack))),
        }
    }

    fn strict_bool(&self, op: Operator, value: &Value) -> EvalResult<bool> {
        match value {
            Value::Boolean(b) => Ok(*b),
            other => Err(EvalError::Type(format!(
                "operator {} requires booleans, got {:?}",
                op, other
            ))),
        }
    }

    // ヘルパーメソッド

    fn compare_values<F>(&self, op: Operator, operands: &[Value], compare: F) -> EvalResult<Value>
    where
        F: Fn(std::cmp::Ordering) -> bool,
    {
        exactly(op, operands, 2)?;
        let (left, right) = (&operands[0], &operands[1]);
        match (left, right) {
            (Value::Integer(l), Value::Integer(r)) => Ok(Value::Boolean(compare(l.cmp(r)))),
            (Value::Float(l), Value::Float(r)) => {
                let ordering = l
                    .partial_cmp(r)
                    .ok_or_else(|| EvalError::Type(format!("{:?} <=> {:?}", left, right)))?;
                Ok(Value::Boolean(compare(ordering)))
            }
            (Value::Integer(l), Value::Float(r)) => {
                let ordering = (*l as f64)
                    .partial_cmp(r)
                    .ok_or_else(|| EvalError::Type(format!("{:?} <=> {:?}", left, right)))?;
                Ok(Value::Boolean(compare(ordering)))
            }
            (Value::Float(l), Value::Integer(r)) => {
                let ordering = l
                    .partial_cmp(&(*r as f64))
                    .ok_or_else(|| EvalError::Type(format!("{:?} <=> {:?}", left, right)))?;
                Ok(Value::Boolean(compare(ordering)))
            }
            (Value::String(l), Value::String(r)) => Ok(Value::Boolean(compare(l.cmp(r)))),
            (Value::DateTime(l), Value::DateTime(r)) => Ok(Value::Boolean(compare(l.cmp(r)))),
            _ => Err(EvalError::Type(format!("{:?} <=> {:?}", left, right))),
        }
    }
}

/// Equality with the same numeric promotion the ordering operators use, so
/// `5 = 5.0` and `5 <= 5.0` agree.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Integer(l), Value::Float(r)) => *l as f64 == *r,
        (Value::Float(l), Value::Integer(r)) => *l == *r as f64,
        _ => left == right,
    }
}

/// Truthiness for the `bool` coercion operator: null, false, zero and empty
/// collections are false, everything else is true.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Boolean(b) => *b,
        Value::Integer(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::List(items) => !items.is_empty(),
        Value::Map(entries) => !entries.is_empty(),
        Value::DateTime(_) | Value::Reference(_) => true,
    }
}

fn exactly(op: Operator, operands: &[Value], expected: usize) -> EvalResult<()> {
    if operands.len() != expected {
        return Err(EvalError::Arity {
            op: op.to_string(),
            expected: expected.to_string(),
            got: operands.len(),
        });
    }
    Ok(())
}

fn at_least(op: Operator, operands: &[Value], expected: usize) -> EvalResult<()> {
    if operands.len() < expected {
        return Err(EvalError::Arity {
            op: op.to_string(),
            expected: format!("at least {}", expected),
            got: operands.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    fn context_with(entries: Vec<(&str, Value)>) -> Context {
        Context::default().overlay(
            entries
                .into_iter()
                .map(|(key, value)| (key.to_string(), value)),
        )
    }

    #[test]
    fn test_literal_evaluation() {
        let evaluator = ExpressionEvaluator::new();
        let context = Context::default();

        let result = evaluator
            .evaluate(&Expression::from(42), &context)
            .unwrap();
        assert!(matches!(result, Value::Integer(42)));

        let result = evaluator
            .evaluate(&Expression::from(3.14), &context)
            .unwrap();
        assert!(matches!(result, Value::Float(f) if (f - 3.14).abs() < f64::EPSILON));

        let result = evaluator
            .evaluate(&Expression::from("hello"), &context)
            .unwrap();
        assert!(matches!(result, Value::String(s) if s == "hello"));

        let result = evaluator
            .evaluate(&Expression::from(true), &context)
            .unwrap();
        assert!(matches!(result, Value::Boolean(true)));

        let result = evaluator
            .evaluate(&Expression::Literal(Literal::Null), &context)
            .unwrap();
        assert!(matches!(result, Value::Null));
    }

    #[test]
    fn test_variable_evaluation() {
        let evaluator = ExpressionEvaluator::new();
        let context = context_with(vec![
            ("x", Value::Integer(42)),
            ("name", Value::String("Alice".to_string())),
        ]);

        let result = evaluator.evaluate(&Expression::eval("x"), &context).unwrap();
        assert!(matches!(result, Value::Integer(42)));

        let result = evaluator
            .evaluate(&Expression::eval("name"), &context)
            .unwrap();
        assert!(matches!(result, Value::String(s) if s == "Alice"));

        // 存在しない変数の評価
        let result = evaluator.evaluate(&Expression::eval("undefined"), &context);
        assert!(matches!(
            result,
            Err(EvalError::UnresolvedVariable { path }) if path == "undefined"
        ));
    }

    #[test]
    fn test_dotted_path_traversal() {
        let evaluator = ExpressionEvaluator::new();
        let mut address = HashMap::new();
        address.insert("city".to_string(), Value::String("Kyoto".to_string()));
        address.insert("active".to_string(), Value::Boolean(true));
        let context = context_with(vec![("address", Value::Map(address))]);

        let result = evaluator
            .evaluate(&Expression::eval("address.city"), &context)
            .unwrap();
        assert!(matches!(result, Value::String(s) if s == "Kyoto"));

        let result = evaluator.evaluate(&Expression::eval("address.zip"), &context);
        assert!(matches!(result, Err(EvalError::UnresolvedVariable { .. })));
    }

    #[test]
    fn test_reference_traversal() {
        let evaluator = ExpressionEvaluator::new();
        let mut address = HashMap::new();
        address.insert("active".to_string(), Value::Boolean(false));
        // contact.address names another context entry, like a stored link
        let mut contact = HashMap::new();
        contact.insert(
            "address".to_string(),
            Value::Reference("the_address".to_string()),
        );
        let context = context_with(vec![
            ("contact", Value::Map(contact)),
            ("the_address", Value::Map(address)),
        ]);

        let result = evaluator
            .evaluate(&Expression::eval("contact.address.active"), &context)
            .unwrap();
        assert!(matches!(result, Value::Boolean(false)));
    }

    #[test]
    fn test_binary_operations() {
        let evaluator = ExpressionEvaluator::new();
        let context = Context::default();

        let expr = Expression::op(
            Operator::Add,
            vec![Expression::from(5), Expression::from(3)],
        );
        assert!(matches!(
            evaluator.evaluate(&expr, &context).unwrap(),
            Value::Integer(8)
        ));

        // Mixed type addition
        let expr = Expression::op(
            Operator::Add,
            vec![Expression::from(5), Expression::from(3.5)],
        );
        assert!(matches!(
            evaluator.evaluate(&expr, &context).unwrap(),
            Value::Float(f) if (f - 8.5).abs() < f64::EPSILON
        ));

        // String concatenation
        let expr = Expression::op(
            Operator::Add,
            vec![Expression::from("Hello "), Expression::from("World")],
        );
        assert!(matches!(
            evaluator.evaluate(&expr, &context).unwrap(),
            Value::String(s) if s == "Hello World"
        ));

        // Division by zero
        let expr = Expression::op(
            Operator::Divide,
            vec![Expression::from(10), Expression::from(0)],
        );
        assert!(matches!(
            evaluator.evaluate(&expr, &context),
            Err(EvalError::DivisionByZero)
        ));
    }

    #[test]
    fn test_comparison_operations() {
        let evaluator = ExpressionEvaluator::new();
        let context = Context::default();

        let expr = Expression::op(
            Operator::Equal,
            vec![Expression::from(5), Expression::from(5)],
        );
        assert!(matches!(
            evaluator.evaluate(&expr, &context).unwrap(),
            Value::Boolean(true)
        ));

        let expr = Expression::op(
            Operator::LessThan,
            vec![Expression::from(3.14), Expression::from(3.15)],
        );
        assert!(matches!(
            evaluator.evaluate(&expr, &context).unwrap(),
            Value::Boolean(true)
        ));

        let expr = Expression::op(
            Operator::GreaterThanEqual,
            vec![Expression::from(10), Expression::from(5)],
        );
        assert!(matches!(
            evaluator.evaluate(&expr, &context).unwrap(),
            Value::Boolean(true)
        ));

        // Mixed numeric comparison
        let expr = Expression::op(
            Operator::GreaterThan,
            vec![Expression::from(2), Expression::from(1.5)],
        );
        assert!(matches!(
            evaluator.evaluate(&expr, &context).unwrap(),
            Value::Boolean(true)
        ));

        // Mixed numeric equality promotes like the ordering operators
        let expr = Expression::op(
            Operator::Equal,
            vec![Expression::from(5), Expression::from(5.0)],
        );
        assert!(matches!(
            evaluator.evaluate(&expr, &context).unwrap(),
            Value::Boolean(true)
        ));
        let expr = Expression::op(
            Operator::NotEqual,
            vec![Expression::from(5), Expression::from(5.0)],
        );
        assert!(matches!(
            evaluator.evaluate(&expr, &context).unwrap(),
            Value::Boolean(false)
        ));
    }

    #[test]
    fn test_logical_operations() {
        let evaluator = ExpressionEvaluator::new();
        let context = Context::default();

        let expr = Expression::op(
            Operator::And,
            vec![
                Expression::from(true),
                Expression::from(true),
                Expression::from(false),
            ],
        );
        assert!(matches!(
            evaluator.evaluate(&expr, &context).unwrap(),
            Value::Boolean(false)
        ));

        let expr = Expression::op(
            Operator::Or,
            vec![Expression::from(false), Expression::from(true)],
        );
        assert!(matches!(
            evaluator.evaluate(&expr, &context).unwrap(),
            Value::Boolean(true)
        ));

        let expr = Expression::op(Operator::Not, vec![Expression::from(true)]);
        assert!(matches!(
            evaluator.evaluate(&expr, &context).unwrap(),
            Value::Boolean(false)
        ));

        // Type mismatch
        let expr = Expression::op(
            Operator::And,
            vec![Expression::from(true), Expression::from(1)],
        );
        assert!(matches!(
            evaluator.evaluate(&expr, &context),
            Err(EvalError::Type(_))
        ));
    }

    #[test]
    fn test_bool_coercion() {
        let evaluator = ExpressionEvaluator::new();
        let context = Context::default();
        let cases = vec![
            (Expression::Literal(Literal::Null), false),
            (Expression::from(0), false),
            (Expression::from(1), true),
            (Expression::from(""), false),
            (Expression::from("x"), true),
            (Expression::Literal(Literal::List(vec![])), false),
            (
                Expression::Literal(Literal::List(vec![Literal::Integer(1)])),
                true,
            ),
        ];
        for (operand, expected) in cases {
            let expr = Expression::op(Operator::Bool, vec![operand]);
            assert_eq!(
                evaluator.evaluate(&expr, &context).unwrap(),
                Value::Boolean(expected)
            );
        }
    }

    #[test]
    fn test_in_operator() {
        let evaluator = ExpressionEvaluator::new();
        let context = context_with(vec![(
            "codes",
            Value::List(vec![Value::Integer(1), Value::Integer(2)]),
        )]);

        let expr = Expression::op(
            Operator::In,
            vec![Expression::from(2), Expression::eval("codes")],
        );
        assert!(matches!(
            evaluator.evaluate(&expr, &context).unwrap(),
            Value::Boolean(true)
        ));

        let expr = Expression::op(
            Operator::In,
            vec![Expression::from("ell"), Expression::from("hello")],
        );
        assert!(matches!(
            evaluator.evaluate(&expr, &context).unwrap(),
            Value::Boolean(true)
        ));
    }

    #[test]
    fn test_if_operator() {
        let evaluator = ExpressionEvaluator::new();
        let context = context_with(vec![("flagged", Value::Boolean(true))]);
        let expr = Expression::op(
            Operator::If,
            vec![
                Expression::eval("flagged"),
                Expression::from("yes"),
                Expression::from("no"),
            ],
        );
        assert!(matches!(
            evaluator.evaluate(&expr, &context).unwrap(),
            Value::String(s) if s == "yes"
        ));
    }

    #[test]
    fn test_arity_errors() {
        let evaluator = ExpressionEvaluator::new();
        let context = Context::default();
        let expr = Expression::op(Operator::Add, vec![Expression::from(1)]);
        assert!(matches!(
            evaluator.evaluate(&expr, &context),
            Err(EvalError::Arity { .. })
        ));
        let expr = Expression::op(Operator::And, vec![Expression::from(true)]);
        assert!(matches!(
            evaluator.evaluate(&expr, &context),
            Err(EvalError::Arity { .. })
        ));
    }

    #[test]
    fn test_nested_expression() {
        let evaluator = ExpressionEvaluator::new();
        let context = Context::default();
        // (5 * 2) + 3
        let expr = Expression::op(
            Operator::Add,
            vec![
                Expression::op(
                    Operator::Multiply,
                    vec![Expression::from(5), Expression::from(2)],
                ),
                Expression::from(3),
            ],
        );
        assert!(matches!(
            evaluator.evaluate(&expr, &context).unwrap(),
            Value::Integer(13)
        ));
    }

    #[test]
    fn test_depth_limit() {
        let evaluator = ExpressionEvaluator::with_config(EvaluatorConfig {
            max_expression_depth: 4,
        });
        let context = Context::default();
        let mut expr = Expression::from(1);
        for _ in 0..8 {
            expr = Expression::op(Operator::Add, vec![expr, Expression::from(1)]);
        }
        assert!(matches!(
            evaluator.evaluate(&expr, &context),
            Err(EvalError::DepthExceeded { limit: 4 })
        ));
    }

    #[test]
    fn test_evaluation_is_pure() {
        let evaluator = ExpressionEvaluator::new();
        let context = context_with(vec![("x", Value::Integer(1))]);
        let expr = Expression::op(
            Operator::Add,
            vec![Expression::eval("x"), Expression::from(1)],
        );
        let first = evaluator.evaluate(&expr, &context).unwrap();
        let second = evaluator.evaluate(&expr, &context).unwrap();
        assert_eq!(first, second);
        assert_eq!(context.get("x"), Some(&Value::Integer(1)));
        assert_eq!(context.len(), 1);
    }
}
