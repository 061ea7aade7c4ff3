//! Authorization module - Ownership Engine and Middleware
//!
//! Decides whether the caller owns, directly or through a chain of parent
//! records, the resource an operation targets:
//! - Declarative relation graph per resource type (`catalog`)
//! - Table-driven owner resolution against an injected reader (`resolver`)
//! - Fail-closed allow/deny with an administrator bypass (`evaluator`)
//! - Per-route declarations applied as axum middleware (`binding`, `middleware`)

mod binding;
mod catalog;
mod evaluator;
mod middleware;
mod principal;
mod resolver;
mod store;

pub use binding::{IdLocation, OwnedResource, RequestView};
pub use catalog::{Catalog, CatalogError, Column, ColumnKind, Entity, Hop, PathSet, ResourceType, Selector, Traversal};
pub use evaluator::{Decision, DefaultOwnershipEvaluator, DenyReason, OwnershipEvaluator};
pub use middleware::{require_ownership, OwnershipGuard};
pub use principal::{Principal, Role, UserId};
pub use resolver::{parse_key, resolve_owner, resolve_owners, ResolveError};
pub use store::{MemoryStore, Record, RecordReader, Scalar, StorageError};

/// Well-known role names
pub mod roles {
    pub const ADMIN: &str = "ADMIN";
    pub const USER: &str = "USER";
}
