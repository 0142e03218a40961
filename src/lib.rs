//! # KASANE: Composable Application Kernel
//!
//! KASANE is the core of an extensible application platform: independently
//! developed packages contribute partial definitions of named entities, and the
//! kernel composes them into unified runtime types. Every operation runs inside
//! a stack-scoped execution context with nested, independently committable
//! cursors, and a small declarative expression language lets stored
//! configuration reference runtime values without embedding executable code.
//!
//! ## Technical Foundations
//!
//! ### 1. Layered Composition
//! Packages register [`contribution::Contribution`]s — partial definitions
//! sharing a logical name. At startup the [`registry::Registry`] linearizes
//! them into a deterministic precedence order, chains their setup hooks, and
//! folds their attribute definitions into one [`registry::CompositeType`].
//!
//! Implementation components:
//! - Contribution model ([`contribution`])
//! - Composition engine and composite registry ([`registry`])
//!
//! ### 2. Scoped Execution Context
//! Each execution unit owns a strict stack of key-value context scopes and a
//! stack of nested transactional cursors. Scope handles guarantee restoration
//! on every exit path; cursors follow an `Open → Committed | RolledBack` state
//! machine with rollback cascading over open children.
//!
//! Implementation components:
//! - Context stack and scope guards ([`context`])
//! - Cursor state machine ([`cursor`])
//!
//! ### 3. Declarative Expressions
//! Expressions and filter domains are tagged trees with a JSON wire form, so
//! they can be stored and transported across process boundaries. The evaluator
//! interprets them against the current context without side effects.
//!
//! Implementation components:
//! - Expression/domain trees and wire codec ([`ast`])
//! - Evaluation system ([`eval`])
//!
//! ## Composition Pipeline
//!
//! ```text
//! register contributions → build registry → open context scope →
//! open cursor → composite-type operations (evaluate expressions,
//! resolve domains, stage effects) → commit or roll back → release scope
//! ```
//!
//! The build phase runs exactly once per process; afterwards the registry is
//! immutable and safe for unsynchronized concurrent lookups. Context and
//! cursor state never cross execution units.

pub mod ast;
pub mod config;
pub mod context;
pub mod contribution;
pub mod cursor;
pub mod error;
pub mod eval;
pub mod registry;

// Re-exports
pub use ast::*;
pub use contribution::*;
pub use error::*;
pub use eval::expression::Value;
pub use eval::{EvalError, EvalResult, ExpressionEvaluator};
pub use registry::{CompositeType, Registry, RegistryError, RegistryResult, TypeConfig};
