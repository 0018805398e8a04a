//! Prepared insert statements

use super::{Database, Status, Value};
use crate::heap::{Block, SimHeap};
use std::fmt;

struct Binding {
    value: Value,
    _mem: Option<Block>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ready,
    Done,
}

/// Prepared insert with one parameter per non-key column
///
/// Parameters are numbered from 1. Unbound parameters insert [`Value::Null`].
pub struct Statement {
    table: String,
    params: Vec<Option<Binding>>,
    phase: Phase,
    heap: SimHeap,
    _mem: Block,
}

impl Statement {
    pub(super) fn new(table: &str, columns: usize, heap: SimHeap, mem: Block) -> Self {
        Self {
            table: table.to_string(),
            params: (0..columns).map(|_| None).collect(),
            phase: Phase::Ready,
            heap,
            _mem: mem,
        }
    }

    /// Number of parameters
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.params.len()
    }

    /// Bind an integer
    pub fn bind_int(&mut self, index: usize, value: i64) -> Status {
        self.bind(index, Value::Integer(value), None)
    }

    /// Bind a copy of `text`
    pub fn bind_text(&mut self, index: usize, text: &str) -> Status {
        if self.slot(index).is_none() {
            return Status::Range;
        }
        match self.heap.allocate(text.len().max(1)) {
            Ok(mem) => self.bind(index, Value::Text(text.to_string()), Some(mem)),
            Err(_) => Status::NoMem,
        }
    }

    /// Bind NULL
    pub fn bind_null(&mut self, index: usize) -> Status {
        self.bind(index, Value::Null, None)
    }

    /// Drop every binding
    pub fn clear_bindings(&mut self) -> Status {
        self.params.iter_mut().for_each(|p| *p = None);
        Status::Ok
    }

    /// Make the statement runnable again; bindings are kept
    pub fn reset(&mut self) -> Status {
        self.phase = Phase::Ready;
        Status::Ok
    }

    /// Insert one row
    ///
    /// Returns [`Status::Done`] on success. An allocation failure inside an
    /// explicit transaction rolls the whole transaction back.
    pub fn step(&mut self, db: &mut Database) -> Status {
        if self.phase == Phase::Done {
            return Status::Misuse;
        }
        match db.tables.get(&self.table) {
            Some(table) if table.columns.len() == self.params.len() => {}
            _ => return Status::Error,
        }
        let values = self
            .params
            .iter()
            .map(|p| p.as_ref().map_or(Value::Null, |b| b.value.clone()))
            .collect();
        match db.insert_rows(&self.table, vec![values]) {
            Ok(()) => {
                self.phase = Phase::Done;
                Status::Done
            }
            Err(Status::NoMem) => {
                // out of memory inside a transaction aborts it
                if !db.autocommit() {
                    db.rollback();
                }
                Status::NoMem
            }
            Err(status) => status,
        }
    }

    /// Release the statement
    pub fn finalize(self) -> Status {
        Status::Ok
    }

    fn slot(&mut self, index: usize) -> Option<&mut Option<Binding>> {
        index.checked_sub(1).and_then(|i| self.params.get_mut(i))
    }

    fn bind(&mut self, index: usize, value: Value, mem: Option<Block>) -> Status {
        match self.slot(index) {
            Some(slot) => {
                *slot = Some(Binding { value, _mem: mem });
                Status::Ok
            }
            None => Status::Range,
        }
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("table", &self.table)
            .field("parameters", &self.params.len())
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}
