//! Stack-scoped, execution-unit-local context.
//!
//! Every execution unit owns exactly one current [`Context`] at any time.
//! [`push`] layers a child scope over the parent and returns a [`ScopeGuard`];
//! releasing the guard — on every exit path — restores the parent. Cursors
//! ([`crate::cursor`]) bind to the scope that opened them: a clean release
//! auto-commits a root cursor and reports any nested cursor left open, while
//! dropping the guard (the error or cancellation exit) rolls everything back.
//!
//! Nothing in here crosses execution units: the stack lives in thread-local
//! storage and the handles are `!Send`, so no locking is ever needed.

use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ContextConfig;
use crate::cursor::{CursorHandle, CursorSlot, CursorState, TransactionError};
use crate::error::KernelResult;
use crate::eval::expression::Value;

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("context scope depth limit ({limit}) exceeded")]
    DepthExceeded { limit: usize },
    #[error("scope released out of order: expected depth {expected}, found {found}")]
    ScopeMismatch { expected: usize, found: usize },
}

/// Immutable snapshot of the active key-value environment. Cloning is cheap;
/// evaluation against a snapshot can never mutate the scope stack.
#[derive(Clone, Debug, Default)]
pub struct Context {
    entries: Arc<HashMap<String, Value>>,
}

impl Context {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Derived context with extra entries, without touching the scope stack.
    /// Used to evaluate expressions against a record's values.
    pub fn overlay(&self, entries: impl IntoIterator<Item = (String, Value)>) -> Context {
        let mut map = (*self.entries).clone();
        map.extend(entries);
        Context {
            entries: Arc::new(map),
        }
    }
}

struct Frame {
    entries: Arc<HashMap<String, Value>>,
    opened_cursors: Vec<usize>,
}

impl Frame {
    fn root() -> Self {
        Self {
            entries: Arc::new(HashMap::new()),
            opened_cursors: Vec::new(),
        }
    }
}

/// Per-execution-unit state: the scope stack, the cursor slab and the
/// committed store.
pub(crate) struct Unit {
    frames: Vec<Frame>,
    pub(crate) cursors: Vec<CursorSlot>,
    pub(crate) open: Vec<usize>, // open cursor ids, innermost last
    pub(crate) store: HashMap<String, Value>,
    config: ContextConfig,
}

impl Unit {
    fn new() -> Self {
        Self {
            frames: vec![Frame::root()],
            cursors: Vec::new(),
            open: Vec::new(),
            store: HashMap::new(),
            config: ContextConfig::default(),
        }
    }

    fn top(&self) -> &Frame {
        self.frames.last().expect("the root frame is never popped")
    }

    fn top_mut(&mut self) -> &mut Frame {
        self.frames
            .last_mut()
            .expect("the root frame is never popped")
    }

    fn pop_scope(&mut self, depth: usize, clean: bool) -> KernelResult<()> {
        if self.frames.len() != depth {
            return Err(ContextError::ScopeMismatch {
                expected: self.frames.len(),
                found: depth,
            }
            .into());
        }
        let frame = self.frames.pop().expect("guard depth is at least 2");

        // Innermost first.
        let open_in_frame: Vec<usize> = frame
            .opened_cursors
            .iter()
            .rev()
            .copied()
            .filter(|id| self.cursors[*id].state == CursorState::Open)
            .collect();

        if !clean {
            for id in open_in_frame {
                self.rollback_cursor(id);
            }
            return Ok(());
        }

        let leaked: Vec<Uuid> = open_in_frame
            .iter()
            .filter(|id| self.cursors[**id].parent.is_some())
            .map(|id| self.cursors[*id].uuid)
            .collect();
        if !leaked.is_empty() {
            // A nested cursor must be resolved explicitly; it is rolled back,
            // never silently committed, and the leak is surfaced.
            for id in open_in_frame {
                self.rollback_cursor(id);
            }
            for uuid in &leaked {
                warn!(cursor = %uuid, "nested cursor left open at scope release; rolled back");
            }
            return Err(TransactionError::LeakedOpen { id: leaked[0] }.into());
        }

        for id in open_in_frame {
            self.commit_cursor(id)?;
        }
        Ok(())
    }

    pub(crate) fn commit_cursor(&mut self, id: usize) -> Result<(), TransactionError> {
        let state = self.cursors[id].state;
        let uuid = self.cursors[id].uuid;
        if state != CursorState::Open {
            return Err(TransactionError::NotOpen { id: uuid, state });
        }
        if self.open.last() != Some(&id) {
            return Err(TransactionError::ChildOpen { id: uuid });
        }
        self.open.pop();
        let buffer = std::mem::take(&mut self.cursors[id].buffer);
        match self.cursors[id].parent {
            Some(parent) => self.cursors[parent].buffer.extend(buffer),
            None => self.store.extend(buffer),
        }
        self.cursors[id].state = CursorState::Committed;
        debug!(cursor = %uuid, "cursor committed");
        Ok(())
    }

    /// Roll back `id` and, first, every cursor nested inside it. Everything
    /// above `id` on the open stack is a descendant.
    pub(crate) fn rollback_cursor(&mut self, id: usize) {
        while let Some(top) = self.open.pop() {
            self.cursors[top].buffer.clear();
            self.cursors[top].state = CursorState::RolledBack;
            debug!(cursor = %self.cursors[top].uuid, "cursor rolled back");
            if top == id {
                break;
            }
        }
    }
}

thread_local! {
    static UNIT: RefCell<Unit> = RefCell::new(Unit::new());
}

pub(crate) fn with_unit<R>(f: impl FnOnce(&mut Unit) -> R) -> R {
    UNIT.with(|unit| f(&mut unit.borrow_mut()))
}

/// Active context for the calling execution unit, created empty on first use.
pub fn current() -> Context {
    with_unit(|unit| Context {
        entries: unit.top().entries.clone(),
    })
}

/// Replace this execution unit's limits. Affects subsequent pushes and
/// cursors only.
pub fn set_config(config: ContextConfig) {
    with_unit(|unit| unit.config = config);
}

/// Write into the current scope. The entry disappears when the scope pops.
pub fn set(key: impl Into<String>, value: Value) {
    with_unit(|unit| {
        let frame = unit.top_mut();
        Arc::make_mut(&mut frame.entries).insert(key.into(), value);
    });
}

/// Layer a child scope whose entries are the parent's updated by `overrides`,
/// and make it current.
pub fn push(overrides: HashMap<String, Value>) -> KernelResult<ScopeGuard> {
    with_unit(|unit| {
        if unit.frames.len() >= unit.config.max_scope_depth {
            return Err(ContextError::DepthExceeded {
                limit: unit.config.max_scope_depth,
            }
            .into());
        }
        let mut entries = (*unit.top().entries).clone();
        entries.extend(overrides);
        unit.frames.push(Frame {
            entries: Arc::new(entries),
            opened_cursors: Vec::new(),
        });
        Ok(ScopeGuard {
            depth: unit.frames.len(),
            released: false,
            _not_send: PhantomData,
        })
    })
}

/// Open a cursor bound to the current scope, nested under the innermost open
/// cursor if there is one.
pub fn new_cursor() -> KernelResult<CursorHandle> {
    with_unit(|unit| {
        if unit.open.len() >= unit.config.max_cursor_depth {
            return Err(TransactionError::NestingTooDeep {
                limit: unit.config.max_cursor_depth,
            }
            .into());
        }
        let id = unit.cursors.len();
        let uuid = Uuid::new_v4();
        let parent = unit.open.last().copied();
        unit.cursors.push(CursorSlot {
            uuid,
            state: CursorState::Open,
            parent,
            buffer: HashMap::new(),
            opened_at: Utc::now(),
        });
        unit.open.push(id);
        unit.top_mut().opened_cursors.push(id);
        debug!(cursor = %uuid, nested = parent.is_some(), "cursor opened");
        Ok(CursorHandle::new(id, uuid))
    })
}

/// Read from the committed store — the effects root cursors have made durable
/// on this execution unit.
pub fn committed(key: &str) -> Option<Value> {
    with_unit(|unit| unit.store.get(key).cloned())
}

/// Handle to one context scope. Releasing it — explicitly or by drop — is the
/// single way the scope ends, so the stack cannot desynchronize on an error
/// path. `!Send`: scopes never migrate between execution units.
#[must_use = "dropping the guard is the error-exit path; call release() on success"]
pub struct ScopeGuard {
    depth: usize,
    released: bool,
    _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
    /// Clean exit: restore the parent scope, auto-commit a root cursor opened
    /// in this scope, and surface any nested cursor left open as a
    /// [`TransactionError`] (after rolling it back).
    pub fn release(mut self) -> KernelResult<()> {
        self.released = true;
        with_unit(|unit| unit.pop_scope(self.depth, true))
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if !self.released {
            // Error or cancellation exit: roll back whatever this scope still
            // owns and restore the parent.
            let _ = with_unit(|unit| unit.pop_scope(self.depth, false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_of(key: &str) -> Option<Value> {
        current().get(key).cloned()
    }

    #[test]
    fn test_root_context_is_empty() {
        assert!(current().is_empty());
    }

    #[test]
    fn test_push_overrides_and_restores() {
        set("k", Value::Integer(1));
        set("other", Value::String("kept".to_string()));

        let scope = push(HashMap::from([("k".to_string(), Value::Integer(2))])).unwrap();
        assert_eq!(value_of("k"), Some(Value::Integer(2)));
        assert_eq!(value_of("other"), Some(Value::String("kept".to_string())));
        scope.release().unwrap();

        assert_eq!(value_of("k"), Some(Value::Integer(1)));
    }

    #[test]
    fn test_drop_restores_parent() {
        set("k", Value::Integer(1));
        {
            let _scope = push(HashMap::from([("k".to_string(), Value::Integer(2))])).unwrap();
            assert_eq!(value_of("k"), Some(Value::Integer(2)));
            // dropped without release: the error exit
        }
        assert_eq!(value_of("k"), Some(Value::Integer(1)));
    }

    #[test]
    fn test_set_is_scoped() {
        let scope = push(HashMap::new()).unwrap();
        set("scoped", Value::Boolean(true));
        assert_eq!(value_of("scoped"), Some(Value::Boolean(true)));
        scope.release().unwrap();
        assert_eq!(value_of("scoped"), None);
    }

    #[test]
    fn test_nested_scopes() {
        let outer = push(HashMap::from([("a".to_string(), Value::Integer(1))])).unwrap();
        let inner = push(HashMap::from([("b".to_string(), Value::Integer(2))])).unwrap();
        assert_eq!(value_of("a"), Some(Value::Integer(1)));
        assert_eq!(value_of("b"), Some(Value::Integer(2)));
        inner.release().unwrap();
        assert_eq!(value_of("b"), None);
        outer.release().unwrap();
        assert_eq!(value_of("a"), None);
    }

    #[test]
    fn test_depth_limit() {
        set_config(ContextConfig {
            max_scope_depth: 3,
            ..ContextConfig::default()
        });
        let _a = push(HashMap::new()).unwrap();
        let _b = push(HashMap::new()).unwrap();
        let error = push(HashMap::new());
        assert!(matches!(
            error,
            Err(crate::error::Error::Context(ContextError::DepthExceeded { limit: 3 }))
        ));
        // the worker thread is reused by later tests
        set_config(ContextConfig::default());
    }

    #[test]
    fn test_threads_are_isolated() {
        set("mine", Value::Integer(7));
        let handle = std::thread::spawn(|| {
            assert!(current().get("mine").is_none());
            set("theirs", Value::Integer(8));
            current().get("theirs").cloned()
        });
        assert_eq!(handle.join().unwrap(), Some(Value::Integer(8)));
        assert!(current().get("theirs").is_none());
    }

    #[test]
    fn test_overlay_does_not_touch_stack() {
        set("x", Value::Integer(1));
        let derived = current().overlay([("x".to_string(), Value::Integer(9))]);
        assert_eq!(derived.get("x"), Some(&Value::Integer(9)));
        assert_eq!(value_of("x"), Some(Value::Integer(1)));
    }

    #[test]
    fn test_restores_across_panic() {
        set("k", Value::Integer(1));
        let result = std::panic::catch_unwind(|| {
            let _scope = push(HashMap::from([("k".to_string(), Value::Integer(2))])).unwrap();
            panic!("operation failed");
        });
        assert!(result.is_err());
        assert_eq!(value_of("k"), Some(Value::Integer(1)));
    }
}
