//! Expression evaluation system.
//!
//! The evaluator interprets the trees defined in [`crate::ast`] against a
//! [`crate::context::Context`] snapshot. It is deliberately pure: evaluation
//! never mutates the context, and resolving a domain produces a new domain of
//! the same shape — which is what lets a stored, context-independent filter be
//! turned into a concrete one at the moment a query executes.
//!
//! # Core Components
//!
//! ## Expression Evaluator
//! Evaluates literals, dotted-path variable references (with relational
//! traversal through [`expression::Value::Reference`] links) and operator
//! applications.
//!
//! ## Domain Resolution
//! Replaces every expression-valued operand in a filter domain with its
//! evaluated literal, leaving field paths and operator tags untouched.

pub mod domain;
pub mod expression;

use thiserror::Error;

pub use expression::{ExpressionEvaluator, Value};

#[derive(Error, Debug)]
pub enum EvalError {
    /// A context key or path segment was absent at evaluation time. Never
    /// silently defaulted.
    #[error("unresolved variable: {path}")]
    UnresolvedVariable { path: String },
    #[error("type error: {0}")]
    Type(String),
    #[error("operator {op} expects {expected} operands, got {got}")]
    Arity {
        op: String,
        expected: String,
        got: usize,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("expression depth limit ({limit}) exceeded")]
    DepthExceeded { limit: usize },
}

pub type EvalResult<T> = Result<T, EvalError>;
