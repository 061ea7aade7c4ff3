use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};

use crate::authz::{Column, ColumnKind, Entity, Record, RecordReader, Scalar, StorageError};

/// [`RecordReader`] over the application's SQLite pool.
///
/// SQL is assembled only from the static entity schema; caller-supplied
/// column names are checked against it and never interpolated otherwise.
#[derive(Debug, Clone)]
pub struct SqliteRecordReader {
    pool: SqlitePool,
}

impl SqliteRecordReader {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Every row of `entity` whose `column` equals `value`, ordered by key.
    pub async fn list_by(&self, entity: Entity, column: &str, value: &Scalar) -> Result<Vec<Record>, StorageError> {
        let filter = schema_column(entity, column)?;
        let columns: Vec<&'static Column> = entity.columns().iter().collect();
        let sql = format!(
            "{} ORDER BY {}",
            select_sql(entity, &columns, filter.name),
            entity.key_column()
        );

        let rows = bind_scalar(sqlx::query(&sql), value).fetch_all(&self.pool).await?;
        rows.iter().map(|row| record_from_row(entity, &columns, row)).collect()
    }
}

#[async_trait]
impl RecordReader for SqliteRecordReader {
    async fn fetch_projected(
        &self,
        entity: Entity,
        key: &Scalar,
        columns: &[&str],
    ) -> Result<Option<Record>, StorageError> {
        let columns = columns
            .iter()
            .map(|column| schema_column(entity, column))
            .collect::<Result<Vec<_>, _>>()?;
        let sql = select_sql(entity, &columns, entity.key_column());

        let row = bind_scalar(sqlx::query(&sql), key).fetch_optional(&self.pool).await?;
        row.map(|row| record_from_row(entity, &columns, &row)).transpose()
    }
}

fn schema_column(entity: Entity, name: &str) -> Result<&'static Column, StorageError> {
    entity.column(name).ok_or_else(|| StorageError::UnknownColumn {
        entity,
        column: name.to_string(),
    })
}

fn select_sql(entity: Entity, columns: &[&'static Column], filter: &str) -> String {
    let names: Vec<&str> = columns.iter().map(|column| column.name).collect();
    format!(
        "SELECT {} FROM {} WHERE {} = ?",
        names.join(", "),
        entity.table(),
        filter
    )
}

fn bind_scalar<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Scalar,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Scalar::Integer(value) => query.bind(*value),
        Scalar::Text(value) => query.bind(value.clone()),
    }
}

fn record_from_row(entity: Entity, columns: &[&'static Column], row: &SqliteRow) -> Result<Record, StorageError> {
    let mut record = Record::new();
    for column in columns {
        let value = match column.kind {
            ColumnKind::Integer => row
                .try_get::<Option<i64>, _>(column.name)
                .map(|value| value.map(Scalar::Integer)),
            ColumnKind::Text => row
                .try_get::<Option<String>, _>(column.name)
                .map(|value| value.map(Scalar::Text)),
        }
        .map_err(|err| StorageError::Malformed {
            entity,
            column: column.name.to_string(),
            message: err.to_string(),
        })?;
        record.insert(column.name, value);
    }
    Ok(record)
}
