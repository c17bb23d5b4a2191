//! In-process object store and warehouse.
//!
//! Both implement the same ports as the S3 and Postgres adapters, with
//! transactional semantics close enough to the warehouse to exercise the
//! loader and merger: statements in one transaction are applied to a snapshot
//! and discarded on the first error. Failures can be injected per statement
//! kind and object visibility can be delayed to mimic an eventually
//! consistent store.

use crate::core::sql::{Query, Statement, StatementKind};
use crate::domain::model::{render_cell, Column};
use crate::domain::ports::{ObjectStore, PutAck, SqlExecutor};
use crate::domain::table::{ObjectLocation, RelationName};
use crate::utils::error::BackendError;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct StoreState {
    objects: HashMap<ObjectLocation, Vec<u8>>,
    put_failures: VecDeque<BackendError>,
    hidden_heads: usize,
    puts: usize,
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    state: Mutex<StoreState>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, location: &ObjectLocation) -> Option<Vec<u8>> {
        lock(&self.state).objects.get(location).cloned()
    }

    pub fn object_count(&self) -> usize {
        lock(&self.state).objects.len()
    }

    /// Number of successful puts so far.
    pub fn put_count(&self) -> usize {
        lock(&self.state).puts
    }

    pub fn fail_next_put(&self, err: BackendError) {
        lock(&self.state).put_failures.push_back(err);
    }

    /// The next `n` HEAD requests report the object as missing.
    pub fn hide_for_heads(&self, n: usize) {
        lock(&self.state).hidden_heads = n;
    }
}

impl ObjectStore for MemoryObjectStore {
    async fn put_object(&self, location: &ObjectLocation, body: Vec<u8>) -> Result<PutAck, BackendError> {
        let mut state = lock(&self.state);
        if let Some(err) = state.put_failures.pop_front() {
            return Err(err);
        }
        let size = body.len() as u64;
        state.objects.insert(location.clone(), body);
        state.puts += 1;
        Ok(PutAck {
            size,
            e_tag: Some(format!("\"mem-{}\"", state.puts)),
        })
    }

    async fn head_object(&self, location: &ObjectLocation) -> Result<Option<u64>, BackendError> {
        let mut state = lock(&self.state);
        if state.hidden_heads > 0 {
            state.hidden_heads -= 1;
            return Ok(None);
        }
        Ok(state.objects.get(location).map(|b| b.len() as u64))
    }

    async fn get_object(&self, location: &ObjectLocation) -> Result<Vec<u8>, BackendError> {
        self.object(location).ok_or_else(|| {
            BackendError::fatal(format!("object {} does not exist", location)).with_code("NoSuchKey")
        })
    }
}

#[derive(Debug, Clone)]
struct MemTable {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Default)]
struct WarehouseState {
    tables: HashMap<RelationName, MemTable>,
    failures: HashMap<StatementKind, BackendError>,
    executed: Vec<String>,
}

pub struct MemoryWarehouse {
    store: Arc<MemoryObjectStore>,
    state: Mutex<WarehouseState>,
}

impl MemoryWarehouse {
    /// COPY statements read staged objects from `store`.
    pub fn new(store: Arc<MemoryObjectStore>) -> Self {
        Self {
            store,
            state: Mutex::new(WarehouseState::default()),
        }
    }

    pub fn create_table(&self, relation: &RelationName, columns: Vec<Column>) {
        lock(&self.state).tables.insert(
            relation.clone(),
            MemTable {
                columns,
                rows: Vec::new(),
            },
        );
    }

    pub fn insert_rows(&self, relation: &RelationName, rows: Vec<Vec<Value>>) {
        if let Some(table) = lock(&self.state).tables.get_mut(relation) {
            table.rows.extend(rows);
        }
    }

    pub fn rows(&self, relation: &RelationName) -> Vec<Vec<Value>> {
        lock(&self.state)
            .tables
            .get(relation)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self, relation: &RelationName) -> usize {
        lock(&self.state)
            .tables
            .get(relation)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// The next statement of this kind fails with `err` (one shot).
    pub fn fail_on(&self, kind: StatementKind, err: BackendError) {
        lock(&self.state).failures.insert(kind, err);
    }

    /// SQL text of every statement attempted so far.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.state).executed.clone()
    }
}

fn missing_relation(relation: &RelationName) -> BackendError {
    BackendError::from_sqlstate("42P01", format!("relation \"{}\" does not exist", relation))
}

fn column_indexes(table: &MemTable, relation: &RelationName, key: &[String]) -> Result<Vec<usize>, BackendError> {
    key.iter()
        .map(|k| {
            table.columns.iter().position(|c| &c.name == k).ok_or_else(|| {
                BackendError::from_sqlstate(
                    "42703",
                    format!("column \"{}\" of relation \"{}\" does not exist", k, relation),
                )
            })
        })
        .collect()
}

/// Key tuple of a row, `None` when any part is null (SQL `=` never matches null).
fn key_of(row: &[Value], indexes: &[usize]) -> Option<Vec<String>> {
    indexes
        .iter()
        .map(|i| match &row[*i] {
            Value::Null => None,
            v => Some(render_cell(v)),
        })
        .collect()
}

/// Parses a staged CSV object the way the bulk copy does: header skipped,
/// invalid UTF-8 replaced, rows that do not fit the relation rejected.
fn copy_rows(columns: &[Column], body: &[u8]) -> (Vec<Vec<Value>>, u64) {
    let text = String::from_utf8_lossy(body);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    let mut rejected = 0;
    for record in reader.records() {
        let parsed = record.ok().filter(|r| r.len() == columns.len()).and_then(|r| {
            columns
                .iter()
                .zip(r.iter())
                .map(|(c, raw)| c.ty.parse_cell(raw))
                .collect::<Option<Vec<Value>>>()
        });
        match parsed {
            Some(row) => rows.push(row),
            None => rejected += 1,
        }
    }
    (rows, rejected)
}

fn apply(
    tables: &mut HashMap<RelationName, MemTable>,
    stmt: &Statement,
    object: Option<&Vec<u8>>,
) -> Result<u64, BackendError> {
    match stmt {
        Statement::Truncate { relation } => {
            let table = tables.get_mut(relation).ok_or_else(|| missing_relation(relation))?;
            let removed = table.rows.len() as u64;
            table.rows.clear();
            Ok(removed)
        }
        Statement::Copy {
            relation,
            source,
            max_rejected,
            ..
        } => {
            let table = tables.get_mut(relation).ok_or_else(|| missing_relation(relation))?;
            let body = object.ok_or_else(|| {
                BackendError::fatal(format!("The specified S3 prefix '{}' does not exist", source.key))
                    .with_code("XX000")
            })?;
            let (rows, rejected) = copy_rows(&table.columns, body);
            if rejected > u64::from(max_rejected.unwrap_or(0)) {
                return Err(BackendError::fatal(format!(
                    "Load into table '{}' failed. {} rows rejected",
                    relation.table, rejected
                ))
                .with_code("XX000"));
            }
            let loaded = rows.len() as u64;
            table.rows.extend(rows);
            Ok(loaded)
        }
        Statement::DeleteMatching { target, staging, key } => {
            let source = tables.get(staging).ok_or_else(|| missing_relation(staging))?;
            let source_idx = column_indexes(source, staging, key)?;
            let incoming: HashSet<Vec<String>> = source
                .rows
                .iter()
                .filter_map(|r| key_of(r, &source_idx))
                .collect();

            let table = tables.get_mut(target).ok_or_else(|| missing_relation(target))?;
            let target_idx = column_indexes(table, target, key)?;
            let before = table.rows.len();
            table.rows.retain(|r| match key_of(r, &target_idx) {
                Some(k) => !incoming.contains(&k),
                None => true,
            });
            Ok((before - table.rows.len()) as u64)
        }
        Statement::InsertSelect { target, staging } => {
            let source = tables.get(staging).ok_or_else(|| missing_relation(staging))?;
            let rows = source.rows.clone();
            let width = source.columns.len();
            let table = tables.get_mut(target).ok_or_else(|| missing_relation(target))?;
            if table.columns.len() != width {
                return Err(BackendError::from_sqlstate(
                    "42601",
                    "INSERT has more expressions than target columns",
                ));
            }
            let inserted = rows.len() as u64;
            table.rows.extend(rows);
            Ok(inserted)
        }
    }
}

#[async_trait::async_trait]
impl SqlExecutor for MemoryWarehouse {
    async fn execute_transaction(&self, statements: &[Statement]) -> Result<Vec<u64>, BackendError> {
        // COPY 需要的物件先取出，避免持鎖時再碰 store
        let objects: Vec<Option<Vec<u8>>> = statements
            .iter()
            .map(|s| match s {
                Statement::Copy { source, .. } => self.store.object(source),
                _ => None,
            })
            .collect();

        let mut state = lock(&self.state);
        let mut working = state.tables.clone();
        let mut affected = Vec::with_capacity(statements.len());

        for (stmt, object) in statements.iter().zip(&objects) {
            state.executed.push(stmt.to_string());
            if let Some(err) = state.failures.remove(&stmt.kind()) {
                return Err(err);
            }
            affected.push(apply(&mut working, stmt, object.as_ref())?);
        }

        state.tables = working;
        Ok(affected)
    }

    async fn query_scalar(&self, query: &Query) -> Result<i64, BackendError> {
        let state = lock(&self.state);
        match query {
            Query::RowCount { relation } => state
                .tables
                .get(relation)
                .map(|t| t.rows.len() as i64)
                .ok_or_else(|| missing_relation(relation)),
            Query::DuplicateKeys { relation, key } => {
                let table = state.tables.get(relation).ok_or_else(|| missing_relation(relation))?;
                let idx = column_indexes(table, relation, key)?;
                let mut counts: HashMap<Vec<String>, usize> = HashMap::new();
                for row in &table.rows {
                    let k = idx.iter().map(|i| render_cell(&row[*i])).collect();
                    *counts.entry(k).or_default() += 1;
                }
                Ok(counts.values().filter(|c| **c > 1).count() as i64)
            }
        }
    }
}
