use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::ast::AstError;
use crate::context::ContextError;
use crate::cursor::TransactionError;
use crate::eval::EvalError;
use crate::registry::RegistryError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    // context
    #[error("Context error: {0}")]
    Context(#[from] ContextError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
    // eval error
    #[error("Eval error: {0}")]
    Eval(#[from] EvalError),
    #[error("AST error: {0}")]
    Ast(#[from] AstError),
    #[error("Validation error: {0}")]
    Validation(ValidationError),
    #[error("Warning: {0}")]
    Warning(Warning),
    #[error("Config error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type KernelResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }

    /// Warnings are surfaced for display but never force a rollback; every
    /// other variant is treated as an error exit by the owning scope.
    pub fn is_warning(&self) -> bool {
        matches!(self, Error::Warning(_))
    }
}

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\$\{([^}]+)\}").unwrap();
}

fn render_template(template: &str, args: &HashMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            args.get(key)
                .cloned()
                .unwrap_or_else(|| format!("${{{}}}", key))
        })
        .into_owned()
}

/// Business-rule failure raised by composite-type logic. The message is a
/// template; `${name}` placeholders are filled from `args` at display time so
/// the same key can be rendered against different records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationError {
    pub message: String,
    pub args: HashMap<String, String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            args: HashMap::new(),
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", render_template(&self.message, &self.args))
    }
}

impl From<ValidationError> for Error {
    fn from(error: ValidationError) -> Self {
        Error::Validation(error)
    }
}

/// Same shape as [`ValidationError`] but explicitly non-fatal: the caller may
/// display it and proceed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Warning {
    pub message: String,
    pub args: HashMap<String, String>,
}

impl Warning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            args: HashMap::new(),
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", render_template(&self.message, &self.args))
    }
}

impl From<Warning> for Error {
    fn from(warning: Warning) -> Self {
        Error::Warning(warning)
    }
}
