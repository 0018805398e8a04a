//! In-memory relational engine allocating through [`SimHeap`]
//!
//! A small stand-in for a real database library: tables with an
//! auto-increment key, secondary indexes, explicit transactions and prepared
//! insert statements. Every call reports a [`Status`] and is atomic with
//! respect to allocation failure: all blocks a call needs are allocated
//! before any state changes.

mod statement;

pub use statement::Statement;

use crate::heap::{Block, OutOfMemory, SimHeap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const CONNECTION_BYTES: usize = 512;
const PAGE_CACHE_BYTES: usize = 4096;
const SCHEMA_BYTES: usize = 256;
const ROW_BYTES: usize = 64;
const INDEX_ENTRY_BYTES: usize = 24;
const JOURNAL_BYTES: usize = 1024;
const UNDO_BYTES: usize = 32;
const STATEMENT_BYTES: usize = 128;

/// Result code of every engine call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Call succeeded
    Ok,
    /// Statement ran to completion
    Done,
    /// An allocation failed; nothing was changed
    NoMem,
    /// Invalid request for the current schema or transaction state
    Error,
    /// API used out of order
    Misuse,
    /// Parameter index out of range
    Range,
}

impl Status {
    /// Ok or Done
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Ok | Self::Done)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::Done => "done",
            Self::NoMem => "out of memory",
            Self::Error => "error",
            Self::Misuse => "misuse",
            Self::Range => "range",
        };
        f.write_str(name)
    }
}

impl From<OutOfMemory> for Status {
    fn from(_: OutOfMemory) -> Self {
        Self::NoMem
    }
}

/// Column value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Absent value
    Null,
    /// 64-bit integer
    Integer(i64),
    /// UTF-8 text
    Text(String),
}

/// A statement for [`Database::execute`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a table with an auto-increment integer key
    CreateTable {
        /// Table name
        name: String,
        /// Key column name
        key: String,
        /// Non-key columns
        columns: Vec<String>,
    },
    /// Create a secondary index over existing rows
    CreateIndex {
        /// Index name
        name: String,
        /// Indexed table
        table: String,
        /// Indexed columns
        columns: Vec<String>,
    },
    /// Insert rows, one value per non-key column
    Insert {
        /// Target table
        table: String,
        /// Row values
        rows: Vec<Vec<Value>>,
    },
    /// Remove an index
    DropIndex {
        /// Index name
        name: String,
    },
    /// Remove a table and its indexes
    DropTable {
        /// Table name
        name: String,
    },
    /// Compact storage; not allowed inside a transaction
    Vacuum,
    /// Open an explicit transaction
    Begin,
    /// Commit the open transaction
    Commit,
    /// Undo the open transaction
    Rollback,
}

impl Command {
    /// `CreateTable` from borrowed names
    #[must_use]
    pub fn create_table(name: &str, key: &str, columns: &[&str]) -> Self {
        Self::CreateTable {
            name: name.to_string(),
            key: key.to_string(),
            columns: columns.iter().map(ToString::to_string).collect(),
        }
    }

    /// `CreateIndex` from borrowed names
    #[must_use]
    pub fn create_index(name: &str, table: &str, columns: &[&str]) -> Self {
        Self::CreateIndex {
            name: name.to_string(),
            table: table.to_string(),
            columns: columns.iter().map(ToString::to_string).collect(),
        }
    }

    /// `Insert` of integer rows
    #[must_use]
    pub fn insert_ints(table: &str, rows: &[&[i64]]) -> Self {
        Self::Insert {
            table: table.to_string(),
            rows: rows
                .iter()
                .map(|row| row.iter().copied().map(Value::Integer).collect())
                .collect(),
        }
    }

    /// `DropIndex`
    #[must_use]
    pub fn drop_index(name: &str) -> Self {
        Self::DropIndex {
            name: name.to_string(),
        }
    }

    /// `DropTable`
    #[must_use]
    pub fn drop_table(name: &str) -> Self {
        Self::DropTable {
            name: name.to_string(),
        }
    }
}

struct Row {
    key: i64,
    values: Vec<Value>,
    _mem: Block,
}

struct Table {
    key_column: String,
    columns: Vec<String>,
    rows: Vec<Row>,
    next_key: i64,
    _mem: Block,
}

struct IndexEntry {
    key: i64,
    _mem: Block,
}

struct Index {
    table: String,
    columns: Vec<String>,
    entries: Vec<IndexEntry>,
    _mem: Block,
}

enum UndoOp {
    Inserted { table: String, next_key: i64 },
    CreatedTable(String),
    DroppedTable(String, Table, Vec<(String, Index)>),
    CreatedIndex(String),
    DroppedIndex(String, Index),
}

struct Undo {
    op: UndoOp,
    _mem: Block,
}

struct Journal {
    undo: Vec<Undo>,
    _mem: Block,
}

/// An open database connection
pub struct Database {
    heap: SimHeap,
    tables: BTreeMap<String, Table>,
    indexes: BTreeMap<String, Index>,
    journal: Option<Journal>,
    page_cache: Option<Block>,
    _connection: Block,
}

impl Database {
    /// Open an empty database
    ///
    /// # Errors
    /// [`Status::NoMem`]; see [`Database::open_handle`] to keep the handle of
    /// a failed open.
    pub fn open(heap: &SimHeap) -> Result<Self, Status> {
        match Self::open_handle(heap) {
            (Status::Ok, Some(db)) => Ok(db),
            (status, _) => Err(status),
        }
    }

    /// Open an empty database, handing back the connection even when its
    /// initialisation fails
    ///
    /// The handle is `None` only when the connection itself could not be
    /// allocated. A handle returned with a failure status answers every
    /// command with [`Status::Misuse`] and must still be closed.
    pub fn open_handle(heap: &SimHeap) -> (Status, Option<Self>) {
        let Ok(connection) = heap.allocate(CONNECTION_BYTES) else {
            return (Status::NoMem, None);
        };
        let page_cache = heap.allocate(PAGE_CACHE_BYTES).ok();
        let status = if page_cache.is_some() {
            Status::Ok
        } else {
            Status::NoMem
        };
        let db = Self {
            heap: heap.clone(),
            tables: BTreeMap::new(),
            indexes: BTreeMap::new(),
            journal: None,
            page_cache,
            _connection: connection,
        };
        (status, Some(db))
    }

    /// True when the connection finished opening
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.page_cache.is_some()
    }

    /// Close the connection, rolling back an open transaction
    pub fn close(mut self) -> Status {
        if self.journal.is_some() {
            self.rollback();
        }
        Status::Ok
    }

    /// True unless an explicit transaction is open
    #[must_use]
    pub fn autocommit(&self) -> bool {
        self.journal.is_none()
    }

    /// Rows in `table`
    #[must_use]
    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.tables.get(table).map(|t| t.rows.len())
    }

    /// Values of the row with `key`
    #[must_use]
    pub fn row(&self, table: &str, key: i64) -> Option<&[Value]> {
        let rows = &self.tables.get(table)?.rows;
        let pos = rows.binary_search_by_key(&key, |r| r.key).ok()?;
        Some(&rows[pos].values)
    }

    /// True when `table` exists
    #[must_use]
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Entries in index `name`
    #[must_use]
    pub fn index_len(&self, name: &str) -> Option<usize> {
        self.indexes.get(name).map(|i| i.entries.len())
    }

    /// Columns covered by index `name`
    #[must_use]
    pub fn index_columns(&self, name: &str) -> Option<&[String]> {
        self.indexes.get(name).map(|i| i.columns.as_slice())
    }

    /// Run one command
    pub fn execute(&mut self, command: &Command) -> Status {
        if !self.is_usable() {
            return Status::Misuse;
        }
        let result = match command {
            Command::CreateTable { name, key, columns } => self.create_table(name, key, columns),
            Command::CreateIndex {
                name,
                table,
                columns,
            } => self.create_index(name, table, columns),
            Command::Insert { table, rows } => self.insert(table, rows),
            Command::DropIndex { name } => self.drop_index(name),
            Command::DropTable { name } => self.drop_table(name),
            Command::Vacuum => self.vacuum(),
            Command::Begin => self.begin(),
            Command::Commit => self.commit(),
            Command::Rollback => {
                if self.journal.is_none() {
                    Err(Status::Error)
                } else {
                    self.rollback();
                    Ok(())
                }
            }
        };
        result.err().unwrap_or(Status::Ok)
    }

    /// Prepare an insert into `table` with one parameter per non-key column
    ///
    /// # Errors
    /// [`Status::Error`] for an unknown table, [`Status::NoMem`],
    /// [`Status::Misuse`] on a connection that failed to open.
    pub fn prepare_insert(&self, table: &str) -> Result<Statement, Status> {
        if !self.is_usable() {
            return Err(Status::Misuse);
        }
        let columns = self.tables.get(table).ok_or(Status::Error)?.columns.len();
        let mem = self.heap.allocate(STATEMENT_BYTES)?;
        Ok(Statement::new(table, columns, self.heap.clone(), mem))
    }

    fn undo_block(&self) -> Result<Option<Block>, OutOfMemory> {
        match self.journal {
            Some(_) => self.heap.allocate(UNDO_BYTES).map(Some),
            None => Ok(None),
        }
    }

    fn record(&mut self, op: UndoOp, mem: Option<Block>) {
        if let (Some(journal), Some(mem)) = (self.journal.as_mut(), mem) {
            journal.undo.push(Undo { op, _mem: mem });
        }
    }

    fn create_table(&mut self, name: &str, key: &str, columns: &[String]) -> Result<(), Status> {
        if self.tables.contains_key(name) || columns.is_empty() || columns.iter().any(|c| c == key) {
            return Err(Status::Error);
        }
        let mem = self.heap.allocate(SCHEMA_BYTES)?;
        let undo = self.undo_block()?;
        self.tables.insert(
            name.to_string(),
            Table {
                key_column: key.to_string(),
                columns: columns.to_vec(),
                rows: Vec::new(),
                next_key: 1,
                _mem: mem,
            },
        );
        self.record(UndoOp::CreatedTable(name.to_string()), undo);
        Ok(())
    }

    fn create_index(&mut self, name: &str, table: &str, columns: &[String]) -> Result<(), Status> {
        let target = self.tables.get(table).ok_or(Status::Error)?;
        let known = |c: &String| *c == target.key_column || target.columns.contains(c);
        if self.indexes.contains_key(name) || columns.is_empty() || !columns.iter().all(known) {
            return Err(Status::Error);
        }
        let keys: Vec<i64> = target.rows.iter().map(|r| r.key).collect();
        let mem = self.heap.allocate(SCHEMA_BYTES)?;
        let blocks = self.heap.allocate_many(keys.len(), INDEX_ENTRY_BYTES)?;
        let undo = self.undo_block()?;
        let entries = keys
            .into_iter()
            .zip(blocks)
            .map(|(key, mem)| IndexEntry { key, _mem: mem })
            .collect();
        self.indexes.insert(
            name.to_string(),
            Index {
                table: table.to_string(),
                columns: columns.to_vec(),
                entries,
                _mem: mem,
            },
        );
        self.record(UndoOp::CreatedIndex(name.to_string()), undo);
        Ok(())
    }

    fn insert(&mut self, table: &str, rows: &[Vec<Value>]) -> Result<(), Status> {
        let target = self.tables.get(table).ok_or(Status::Error)?;
        if rows.iter().any(|r| r.len() != target.columns.len()) {
            return Err(Status::Error);
        }
        self.insert_rows(table, rows.to_vec())
    }

    /// Allocate everything first, then append `rows` to an existing table
    pub(crate) fn insert_rows(&mut self, table: &str, rows: Vec<Vec<Value>>) -> Result<(), Status> {
        let indexed = self.indexes.values().filter(|i| i.table == table).count();
        let row_blocks = self.heap.allocate_many(rows.len(), ROW_BYTES)?;
        let entry_blocks = self.heap.allocate_many(rows.len() * indexed, INDEX_ENTRY_BYTES)?;
        let undo = self.undo_block()?;

        let target = self.tables.get_mut(table).ok_or(Status::Error)?;
        let first_key = target.next_key;
        let mut keys = Vec::with_capacity(rows.len());
        for (values, mem) in rows.into_iter().zip(row_blocks) {
            let key = target.next_key;
            target.next_key += 1;
            keys.push(key);
            target.rows.push(Row {
                key,
                values,
                _mem: mem,
            });
        }

        let mut entry_blocks = entry_blocks.into_iter();
        for index in self.indexes.values_mut().filter(|i| i.table == table) {
            for (key, mem) in keys.iter().copied().zip(entry_blocks.by_ref()) {
                index.entries.push(IndexEntry { key, _mem: mem });
            }
        }

        self.record(
            UndoOp::Inserted {
                table: table.to_string(),
                next_key: first_key,
            },
            undo,
        );
        Ok(())
    }

    fn drop_index(&mut self, name: &str) -> Result<(), Status> {
        if !self.indexes.contains_key(name) {
            return Err(Status::Error);
        }
        let _scratch = self.heap.allocate(SCHEMA_BYTES)?;
        let undo = self.undo_block()?;
        if let Some(index) = self.indexes.remove(name) {
            if undo.is_some() {
                self.record(UndoOp::DroppedIndex(name.to_string(), index), undo);
            }
        }
        Ok(())
    }

    fn drop_table(&mut self, name: &str) -> Result<(), Status> {
        if !self.tables.contains_key(name) {
            return Err(Status::Error);
        }
        let _scratch = self.heap.allocate(SCHEMA_BYTES)?;
        let undo = self.undo_block()?;
        let dependent: Vec<String> = self
            .indexes
            .iter()
            .filter(|(_, i)| i.table == name)
            .map(|(n, _)| n.clone())
            .collect();
        let indexes: Vec<(String, Index)> = dependent
            .into_iter()
            .filter_map(|n| self.indexes.remove(&n).map(|i| (n, i)))
            .collect();
        if let Some(table) = self.tables.remove(name) {
            if undo.is_some() {
                self.record(UndoOp::DroppedTable(name.to_string(), table, indexes), undo);
            }
        }
        Ok(())
    }

    fn vacuum(&mut self) -> Result<(), Status> {
        if self.journal.is_some() {
            return Err(Status::Error);
        }
        let rows: usize = self.tables.values().map(|t| t.rows.len()).sum();
        let _scratch = self.heap.allocate(PAGE_CACHE_BYTES)?;
        let _copies = self.heap.allocate_many(self.tables.len() + rows.min(8), ROW_BYTES)?;
        Ok(())
    }

    fn begin(&mut self) -> Result<(), Status> {
        if self.journal.is_some() {
            return Err(Status::Error);
        }
        let mem = self.heap.allocate(JOURNAL_BYTES)?;
        self.journal = Some(Journal {
            undo: Vec::new(),
            _mem: mem,
        });
        Ok(())
    }

    fn commit(&mut self) -> Result<(), Status> {
        if self.journal.is_none() {
            return Err(Status::Error);
        }
        let _commit_record = self.heap.allocate(UNDO_BYTES)?;
        self.journal = None;
        Ok(())
    }

    /// Undo every change of the open transaction and return to autocommit
    pub(crate) fn rollback(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        for undo in journal.undo.into_iter().rev() {
            match undo.op {
                UndoOp::Inserted { table, next_key } => {
                    if let Some(t) = self.tables.get_mut(&table) {
                        t.rows.retain(|r| r.key < next_key);
                        t.next_key = next_key;
                    }
                    for index in self.indexes.values_mut().filter(|i| i.table == table) {
                        index.entries.retain(|e| e.key < next_key);
                    }
                }
                UndoOp::CreatedTable(name) => {
                    self.tables.remove(&name);
                }
                UndoOp::DroppedTable(name, table, indexes) => {
                    self.tables.insert(name, table);
                    self.indexes.extend(indexes);
                }
                UndoOp::CreatedIndex(name) => {
                    self.indexes.remove(&name);
                }
                UndoOp::DroppedIndex(name, index) => {
                    self.indexes.insert(name, index);
                }
            }
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("tables", &self.tables.keys().collect::<Vec<_>>())
            .field("indexes", &self.indexes.keys().collect::<Vec<_>>())
            .field("autocommit", &self.autocommit())
            .finish()
    }
}
