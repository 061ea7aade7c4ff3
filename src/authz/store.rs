//! Storage reader contract used by the resolver.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use super::catalog::{ColumnKind, Entity};

/// A single column value. Keys are scalars too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Integer(i64),
    Text(String),
}

impl Scalar {
    pub fn kind(&self) -> ColumnKind {
        match self {
            Scalar::Integer(_) => ColumnKind::Integer,
            Scalar::Text(_) => ColumnKind::Text,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Integer(value) => write!(f, "{value}"),
            Scalar::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

/// Row (or projected part of one). Null columns are kept as `None` so a
/// dangling link can be told apart from a column that was never read.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    columns: BTreeMap<String, Option<Scalar>>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<Scalar>) -> Self {
        self.insert(column, Some(value.into()));
        self
    }

    pub fn with_null(mut self, column: &str) -> Self {
        self.insert(column, None);
        self
    }

    pub fn insert(&mut self, column: &str, value: Option<Scalar>) {
        self.columns.insert(column.to_string(), value);
    }

    /// `None` if the column is absent from the record, `Some(None)` if null.
    pub fn get(&self, column: &str) -> Option<Option<&Scalar>> {
        self.columns.get(column).map(Option::as_ref)
    }

    pub fn project(&self, columns: &[&str]) -> Record {
        let columns = self
            .columns
            .iter()
            .filter(|(name, _)| columns.iter().any(|column| name.as_str() == *column))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Record { columns }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("{entity} has no column {column}")]
    UnknownColumn { entity: Entity, column: String },
    #[error("malformed value in {entity}.{column}: {message}")]
    Malformed {
        entity: Entity,
        column: String,
        message: String,
    },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Read-only access to stored entities by primary key.
#[async_trait]
pub trait RecordReader: Send + Sync {
    /// Fetches only `columns` of the row whose key equals `key`.
    async fn fetch_projected(
        &self,
        entity: Entity,
        key: &Scalar,
        columns: &[&str],
    ) -> Result<Option<Record>, StorageError>;

    async fn fetch(&self, entity: Entity, key: &Scalar) -> Result<Option<Record>, StorageError> {
        let columns: Vec<&str> = entity.columns().iter().map(|column| column.name).collect();
        self.fetch_projected(entity, key, &columns).await
    }
}

/// In-process fixture storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    rows: HashMap<(Entity, Scalar), Record>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `record` under its `id` column. Rows without an id are ignored.
    pub fn with(mut self, entity: Entity, record: Record) -> Self {
        self.insert(entity, record);
        self
    }

    pub fn insert(&mut self, entity: Entity, record: Record) {
        if let Some(Some(key)) = record.get(entity.key_column()) {
            let key = key.clone();
            self.rows.insert((entity, key), record);
        }
    }

    pub fn remove(&mut self, entity: Entity, key: &Scalar) -> Option<Record> {
        self.rows.remove(&(entity, key.clone()))
    }
}

#[async_trait]
impl RecordReader for MemoryStore {
    async fn fetch_projected(
        &self,
        entity: Entity,
        key: &Scalar,
        columns: &[&str],
    ) -> Result<Option<Record>, StorageError> {
        if let Some(unknown) = columns.iter().find(|column| entity.column(column).is_none()) {
            return Err(StorageError::UnknownColumn {
                entity,
                column: unknown.to_string(),
            });
        }

        // Columns a fixture row never set read as null, like an SQL row.
        Ok(self.rows.get(&(entity, key.clone())).map(|record| {
            let mut projected = record.project(columns);
            for column in columns {
                if projected.get(column).is_none() {
                    projected.insert(column, None);
                }
            }
            projected
        }))
    }
}
