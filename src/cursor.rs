//! Nested transactional cursors.
//!
//! A cursor is a resource bound to the context scope that opened it, following
//! a strict state machine: `Open → Committed` or `Open → RolledBack`, both
//! terminal. Cursors nest: committing an inner cursor folds its staged effects
//! into the outer one, so they only become durable when the outermost (root)
//! cursor commits; rolling an outer cursor back discards everything nested
//! inside it, committed or not.
//!
//! Root cursors resolve automatically with their scope — commit on clean
//! release, rollback on the error exit. Nested cursors must be resolved
//! explicitly; one left open at a clean release is rolled back and surfaced as
//! a [`TransactionError`], never silently committed.

use std::collections::HashMap;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::context::with_unit;
use crate::eval::expression::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CursorState {
    Open,
    Committed,
    RolledBack,
}

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("cursor {id} is {state}, not open")]
    NotOpen { id: Uuid, state: CursorState },
    #[error("cursor {id} still has an open nested cursor")]
    ChildOpen { id: Uuid },
    #[error("cursor {id} was left open at scope release")]
    LeakedOpen { id: Uuid },
    #[error("cursor nesting depth limit ({limit}) exceeded")]
    NestingTooDeep { limit: usize },
}

pub(crate) struct CursorSlot {
    pub(crate) uuid: Uuid,
    pub(crate) state: CursorState,
    pub(crate) parent: Option<usize>,
    pub(crate) buffer: HashMap<String, Value>,
    pub(crate) opened_at: DateTime<Utc>,
}

/// Handle to one cursor. `!Send`: cursors never cross execution units.
pub struct CursorHandle {
    id: usize,
    uuid: Uuid,
    _not_send: PhantomData<*const ()>,
}

impl CursorHandle {
    pub(crate) fn new(id: usize, uuid: Uuid) -> Self {
        Self {
            id,
            uuid,
            _not_send: PhantomData,
        }
    }

    pub fn id(&self) -> Uuid {
        self.uuid
    }

    pub fn state(&self) -> CursorState {
        with_unit(|unit| unit.cursors[self.id].state)
    }

    pub fn is_nested(&self) -> bool {
        with_unit(|unit| unit.cursors[self.id].parent.is_some())
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        with_unit(|unit| unit.cursors[self.id].opened_at)
    }

    /// Stage a data effect under this cursor. Staged effects become durable
    /// only when this cursor and every cursor above it commit.
    pub fn stage(&self, key: impl Into<String>, value: Value) -> Result<(), TransactionError> {
        with_unit(|unit| {
            let slot = &mut unit.cursors[self.id];
            if slot.state != CursorState::Open {
                return Err(TransactionError::NotOpen {
                    id: slot.uuid,
                    state: slot.state,
                });
            }
            slot.buffer.insert(key.into(), value);
            Ok(())
        })
    }

    /// Read through this cursor: staged effects shadow the enclosing cursors,
    /// which shadow the committed store.
    pub fn get(&self, key: &str) -> Option<Value> {
        with_unit(|unit| {
            let mut cursor = Some(self.id);
            while let Some(id) = cursor {
                if let Some(value) = unit.cursors[id].buffer.get(key) {
                    return Some(value.clone());
                }
                cursor = unit.cursors[id].parent;
            }
            unit.store.get(key).cloned()
        })
    }

    /// Fold staged effects into the enclosing cursor, or into the committed
    /// store for a root cursor. Fails if the cursor is not open or still has
    /// an open nested cursor.
    pub fn commit(self) -> Result<(), TransactionError> {
        with_unit(|unit| unit.commit_cursor(self.id))
    }

    /// Discard staged effects, cascading over any cursor still open inside
    /// this one.
    pub fn rollback(self) -> Result<(), TransactionError> {
        with_unit(|unit| {
            let slot = &unit.cursors[self.id];
            if slot.state != CursorState::Open {
                return Err(TransactionError::NotOpen {
                    id: slot.uuid,
                    state: slot.state,
                });
            }
            unit.rollback_cursor(self.id);
            Ok(())
        })
    }
}
