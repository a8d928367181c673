use std::collections::{BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::config::DestinationTable;
use crate::errors::SyncError;
use crate::models::Campaign;

/// What the loader needs to know about an existing destination table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableInfo {
    pub clustering_fields: Vec<String>,
    pub num_rows: Option<u64>,
}

/// Physical layout applied when an append creates the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub clustering_fields: Vec<String>,
}

/// Destination table operations used by the upsert.
///
/// One implementation is bound to one table. Column names and types are
/// inferred by the implementation from the rows it receives.
#[async_trait]
pub trait Warehouse: Send + Sync {
    fn destination(&self) -> &DestinationTable;

    /// Table metadata, or `None` when the table does not exist.
    async fn describe_table(&self) -> Result<Option<TableInfo>, SyncError>;

    /// Deletes every row whose `id` (compared as a string) is in `ids`.
    /// Returns the number of rows removed.
    async fn delete_ids(&self, ids: &[String]) -> Result<u64, SyncError>;

    /// Appends `rows`, widening the schema with any new fields. When
    /// `create` is given the table is created with that layout if missing.
    /// Returns the number of rows written.
    async fn append(&self, rows: &[Campaign], create: Option<&TableLayout>) -> Result<u64, SyncError>;

    /// Sets the table's clustering columns.
    async fn set_clustering(&self, fields: &[String]) -> Result<(), SyncError>;
}

/// Record of a call made against a [`MemoryWarehouse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarehouseCall {
    Describe,
    Delete { ids: usize },
    Append { rows: usize, create: bool },
    SetClustering(Vec<String>),
}

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    rows: Vec<Campaign>,
    columns: BTreeSet<String>,
    clustering_fields: Vec<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    table: Option<MemoryTable>,
    calls: Vec<WarehouseCall>,
}

/// In-process table used for dry runs and tests. Mirrors BigQuery's
/// observable behavior: appends infer and widen columns, deletes on a
/// missing table fail.
pub struct MemoryWarehouse {
    destination: DestinationTable,
    state: Mutex<MemoryState>,
}

impl MemoryWarehouse {
    /// A warehouse whose table does not exist yet.
    pub fn new(destination: DestinationTable) -> Self {
        Self {
            destination,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// A warehouse whose table already holds `rows`.
    pub fn with_rows(
        destination: DestinationTable,
        rows: Vec<Campaign>,
        clustering_fields: Vec<String>,
    ) -> Self {
        let mut table = MemoryTable {
            clustering_fields,
            ..MemoryTable::default()
        };
        for row in rows {
            table.columns.extend(row.fields().keys().cloned());
            table.rows.push(row);
        }
        Self {
            destination,
            state: Mutex::new(MemoryState {
                table: Some(table),
                calls: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn table_exists(&self) -> bool {
        self.lock().table.is_some()
    }

    /// Current rows in insertion order.
    pub fn rows(&self) -> Vec<Campaign> {
        self.lock()
            .table
            .as_ref()
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }

    /// Inferred column names, sorted.
    pub fn columns(&self) -> Vec<String> {
        self.lock()
            .table
            .as_ref()
            .map(|table| table.columns.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clustering_fields(&self) -> Vec<String> {
        self.lock()
            .table
            .as_ref()
            .map(|table| table.clustering_fields.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<WarehouseCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn not_found(&self) -> SyncError {
        SyncError::Load(format!("Not found: Table {}", self.destination))
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    fn destination(&self) -> &DestinationTable {
        &self.destination
    }

    async fn describe_table(&self) -> Result<Option<TableInfo>, SyncError> {
        let mut state = self.lock();
        state.calls.push(WarehouseCall::Describe);
        Ok(state.table.as_ref().map(|table| TableInfo {
            clustering_fields: table.clustering_fields.clone(),
            num_rows: Some(table.rows.len() as u64),
        }))
    }

    async fn delete_ids(&self, ids: &[String]) -> Result<u64, SyncError> {
        let mut state = self.lock();
        state.calls.push(WarehouseCall::Delete { ids: ids.len() });

        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let table = state.table.as_mut().ok_or_else(|| self.not_found())?;
        let before = table.rows.len();
        table
            .rows
            .retain(|row| !row.id().is_some_and(|id| wanted.contains(id.as_str())));
        Ok((before - table.rows.len()) as u64)
    }

    async fn append(&self, rows: &[Campaign], create: Option<&TableLayout>) -> Result<u64, SyncError> {
        let mut state = self.lock();
        state.calls.push(WarehouseCall::Append {
            rows: rows.len(),
            create: create.is_some(),
        });

        if state.table.is_none() {
            let layout = create.ok_or_else(|| self.not_found())?;
            state.table = Some(MemoryTable {
                clustering_fields: layout.clustering_fields.clone(),
                ..MemoryTable::default()
            });
        }

        let table = state.table.as_mut().ok_or_else(|| self.not_found())?;
        for row in rows {
            table.columns.extend(row.fields().keys().cloned());
            table.rows.push(row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn set_clustering(&self, fields: &[String]) -> Result<(), SyncError> {
        let mut state = self.lock();
        state.calls.push(WarehouseCall::SetClustering(fields.to_vec()));

        let table = state.table.as_mut().ok_or_else(|| self.not_found())?;
        table.clustering_fields = fields.to_vec();
        Ok(())
    }
}
