//! Ownership resolver
//!
//! Walks a catalog traversal against a [`RecordReader`], one read per hop,
//! and returns the user id found at the terminal hop. Nothing is cached: each
//! call reflects storage as it is at that moment.

use super::catalog::{Catalog, ColumnKind, Entity, ResourceType, Selector, Traversal};
use super::principal::UserId;
use super::store::{RecordReader, Scalar, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no ownership path for {resource_type} (selector {selector})")]
    NotConfigured { resource_type: String, selector: String },
    #[error("identifier {raw:?} is not a valid {expected} key")]
    InvalidId { raw: String, expected: ColumnKind },
    #[error("{entity} {key} not found or not linked")]
    NotFound { entity: Entity, key: Scalar },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ResolveError {
    pub fn not_configured(resource_type: impl ToString, selector: Option<impl ToString>) -> Self {
        Self::NotConfigured {
            resource_type: resource_type.to_string(),
            selector: selector.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string()),
        }
    }
}

/// Parses a caller-supplied identifier into the key kind a traversal starts on.
pub fn parse_key(raw: &str, kind: ColumnKind) -> Result<Scalar, ResolveError> {
    let trimmed = raw.trim();
    let invalid = || ResolveError::InvalidId {
        raw: raw.to_string(),
        expected: kind,
    };

    match kind {
        ColumnKind::Integer => trimmed.parse::<i64>().map(Scalar::Integer).map_err(|_| invalid()),
        ColumnKind::Text if trimmed.is_empty() => Err(invalid()),
        ColumnKind::Text => Ok(Scalar::Text(trimmed.to_string())),
    }
}

/// Resolves the owner of `raw_id` for the given resource type and optional
/// selector. Default paths may list several candidates; a candidate that
/// ends in `NotFound` hands over to the next one, any other error stops.
pub async fn resolve_owner<R>(
    reader: &R,
    catalog: &Catalog,
    resource_type: ResourceType,
    raw_id: &str,
    selector: Option<Selector>,
) -> Result<UserId, ResolveError>
where
    R: RecordReader + ?Sized,
{
    let candidates = catalog
        .lookup(resource_type, selector)
        .ok_or_else(|| ResolveError::not_configured(resource_type, selector))?;

    let mut last_miss = None;
    for traversal in candidates {
        match follow(reader, traversal, raw_id).await {
            Ok(owner) => return Ok(owner),
            Err(err @ ResolveError::NotFound { .. }) => last_miss = Some(err),
            Err(err) => return Err(err),
        }
    }

    Err(last_miss.unwrap_or_else(|| ResolveError::not_configured(resource_type, selector)))
}

/// Every owner reachable through the default candidates, in catalog order.
/// A type with several candidates may be owned by more than one user; a
/// candidate that ends in `NotFound` is skipped, any other error stops.
pub async fn resolve_owners<R>(
    reader: &R,
    catalog: &Catalog,
    resource_type: ResourceType,
    raw_id: &str,
    selector: Option<Selector>,
) -> Result<Vec<UserId>, ResolveError>
where
    R: RecordReader + ?Sized,
{
    let candidates = catalog
        .lookup(resource_type, selector)
        .ok_or_else(|| ResolveError::not_configured(resource_type, selector))?;

    let mut owners = Vec::with_capacity(candidates.len());
    let mut last_miss = None;
    for traversal in candidates {
        match follow(reader, traversal, raw_id).await {
            Ok(owner) if owners.contains(&owner) => {}
            Ok(owner) => owners.push(owner),
            Err(err @ ResolveError::NotFound { .. }) => last_miss = Some(err),
            Err(err) => return Err(err),
        }
    }

    if owners.is_empty() {
        return Err(last_miss.unwrap_or_else(|| ResolveError::not_configured(resource_type, selector)));
    }
    Ok(owners)
}

async fn follow<R>(reader: &R, traversal: &Traversal, raw_id: &str) -> Result<UserId, ResolveError>
where
    R: RecordReader + ?Sized,
{
    let start = traversal.key_kind().unwrap_or(ColumnKind::Text);
    let mut key = parse_key(raw_id, start)?;

    for hop in traversal.hops() {
        let record = reader
            .fetch_projected(hop.entity, &key, &[hop.project])
            .await?
            .ok_or_else(|| ResolveError::NotFound {
                entity: hop.entity,
                key: key.clone(),
            })?;

        let next = match record.get(hop.project) {
            Some(Some(value)) => value.clone(),
            Some(None) => {
                tracing::trace!(entity = %hop.entity, key = %key, column = hop.project, "dangling link");
                return Err(ResolveError::NotFound { entity: hop.entity, key });
            }
            None => {
                return Err(StorageError::Malformed {
                    entity: hop.entity,
                    column: hop.project.to_string(),
                    message: "projected column missing from row".to_string(),
                }
                .into())
            }
        };

        let expected = hop
            .entity
            .column(hop.project)
            .map(|column| column.kind)
            .unwrap_or(ColumnKind::Text);
        if next.kind() != expected {
            return Err(StorageError::Malformed {
                entity: hop.entity,
                column: hop.project.to_string(),
                message: format!("expected {expected}, found {}", next.kind()),
            }
            .into());
        }

        tracing::trace!(entity = %hop.entity, key = %key, column = hop.project, next = %next, "hop");

        if hop.terminal {
            return match next {
                Scalar::Text(owner) => Ok(UserId::new(owner)),
                Scalar::Integer(_) => Err(StorageError::Malformed {
                    entity: hop.entity,
                    column: hop.project.to_string(),
                    message: "owner id must be text".to_string(),
                }
                .into()),
            };
        }

        key = next;
    }

    // Registered traversals always end on a terminal hop.
    Err(ResolveError::NotFound {
        entity: traversal.hops().last().map(|hop| hop.entity).unwrap_or(Entity::User),
        key,
    })
}
