//! Thin read/create endpoints for the farm entities. Ownership is enforced
//! by the route layer before any of these run.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, MethodRouter};
use axum::Json;
use serde::Deserialize;

use crate::app::AppState;
use crate::authz::{parse_key, ColumnKind, Entity, Record, RecordReader, Scalar};
use crate::errors::{AppError, AppResult};

/// `GET` handler returning the row of `entity` named by the route's single
/// path parameter.
pub fn show(entity: Entity) -> MethodRouter<AppState> {
    get(move |State(state): State<AppState>, Path(id): Path<String>| async move {
        fetch_one(&state, entity, &id).await
    })
}

/// `GET` handler listing rows of `entity` whose `parent_column` equals the
/// route's single path parameter.
pub fn children(entity: Entity, parent_column: &'static str) -> MethodRouter<AppState> {
    get(move |State(state): State<AppState>, Path(parent): Path<String>| async move {
        list_children(&state, entity, parent_column, &parent).await
    })
}

async fn fetch_one(state: &AppState, entity: Entity, id: &str) -> AppResult<Json<Record>> {
    let not_found = || AppError::not_found(format!("{entity} {id} not found"));
    let key = parse_key(id, entity.key_kind()).map_err(|_| not_found())?;

    state
        .records
        .fetch(entity, &key)
        .await?
        .map(Json)
        .ok_or_else(not_found)
}

async fn list_children(
    state: &AppState,
    entity: Entity,
    parent_column: &'static str,
    parent: &str,
) -> AppResult<Json<Vec<Record>>> {
    let kind = entity
        .column(parent_column)
        .map(|column| column.kind)
        .ok_or_else(|| AppError::internal(format!("{entity} has no column {parent_column}")))?;
    let key = parse_key(parent, kind).map_err(|err| AppError::bad_request(err.to_string()))?;

    let rows = state.records.list_by(entity, parent_column, &key).await?;
    Ok(Json(rows))
}

/// Identifier given either as a JSON number or a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Number(i64),
    Text(String),
}

impl RawId {
    fn to_key(&self) -> AppResult<Scalar> {
        match self {
            RawId::Number(value) => Ok(Scalar::Integer(*value)),
            RawId::Text(value) => {
                parse_key(value, ColumnKind::Integer).map_err(|err| AppError::bad_request(err.to_string()))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MeasurementCreateRequest {
    pub pen_variable_type_of_object_id: RawId,
    pub value: Option<String>,
}

pub async fn create_measurement(
    State(state): State<AppState>,
    Json(payload): Json<MeasurementCreateRequest>,
) -> AppResult<(StatusCode, Json<Record>)> {
    let link = payload.pen_variable_type_of_object_id.to_key()?;
    let Scalar::Integer(link_id) = link else {
        return Err(AppError::bad_request("pen_variable_type_of_object_id must be an integer"));
    };

    if state
        .records
        .fetch_projected(Entity::PenVariableTypeOfObject, &link, &["id"])
        .await?
        .is_none()
    {
        return Err(AppError::not_found(format!(
            "{} {link_id} not found",
            Entity::PenVariableTypeOfObject
        )));
    }

    let result = sqlx::query("INSERT INTO measurements (pen_variable_type_of_object_id, value) VALUES (?, ?)")
        .bind(link_id)
        .bind(&payload.value)
        .execute(&state.pool)
        .await?;

    let id = Scalar::Integer(result.last_insert_rowid());
    let record = state
        .records
        .fetch(Entity::Measurement, &id)
        .await?
        .ok_or_else(|| AppError::internal("measurement vanished after insert"))?;

    tracing::info!(measurement_id = %id, pen_variable_type_of_object_id = link_id, "measurement created");

    Ok((StatusCode::CREATED, Json(record)))
}
