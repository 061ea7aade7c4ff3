use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::catalog::{Catalog, ResourceType, Selector};
use super::principal::{Principal, UserId};
use super::resolver::{self, ResolveError};
use super::store::RecordReader;

/// Outcome of an ownership check. Deny carries no cause on purpose; the
/// cause is only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }
}

/// Why a check was denied. Server-side only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    MissingIdentifier,
    NotConfigured,
    InvalidId,
    NotFound,
    OwnershipMismatch,
    StorageFailure,
}

impl DenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DenyReason::MissingIdentifier => "missing_identifier",
            DenyReason::NotConfigured => "not_configured",
            DenyReason::InvalidId => "invalid_id",
            DenyReason::NotFound => "not_found",
            DenyReason::OwnershipMismatch => "ownership_mismatch",
            DenyReason::StorageFailure => "storage_failure",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ResolveError> for DenyReason {
    fn from(err: &ResolveError) -> Self {
        match err {
            ResolveError::NotConfigured { .. } => DenyReason::NotConfigured,
            ResolveError::InvalidId { .. } => DenyReason::InvalidId,
            ResolveError::NotFound { .. } => DenyReason::NotFound,
            ResolveError::Storage(_) => DenyReason::StorageFailure,
        }
    }
}

fn deny(principal: &Principal, resource_type: &str, reason: DenyReason, detail: &dyn fmt::Display) -> Decision {
    match reason {
        DenyReason::NotConfigured | DenyReason::StorageFailure => tracing::error!(
            user_id = %principal.user_id,
            resource_type = %resource_type,
            reason = %reason,
            error = %detail,
            "ownership check failed"
        ),
        _ => tracing::debug!(
            user_id = %principal.user_id,
            resource_type = %resource_type,
            reason = %reason,
            detail = %detail,
            "ownership denied"
        ),
    }
    Decision::Deny
}

/// Ownership evaluator trait for pluggable storage/catalog backends
///
/// Implementors only supply `resolve_owner`; the provided `authorize`
/// methods hold the fail-closed decision rules:
/// 1. elevated role -> allow
/// 2. missing identifier -> deny
/// 3. resolve owners; any error -> deny
/// 4. allow iff the principal is one of the owners
#[async_trait]
pub trait OwnershipEvaluator: Send + Sync {
    async fn resolve_owner(
        &self,
        resource_type: ResourceType,
        raw_id: &str,
        selector: Option<Selector>,
    ) -> Result<UserId, ResolveError>;

    /// All owners of the resource. Defaults to the single resolved owner.
    async fn resolve_owners(
        &self,
        resource_type: ResourceType,
        raw_id: &str,
        selector: Option<Selector>,
    ) -> Result<Vec<UserId>, ResolveError> {
        self.resolve_owner(resource_type, raw_id, selector)
            .await
            .map(|owner| vec![owner])
    }

    async fn authorize(
        &self,
        principal: &Principal,
        resource_type: ResourceType,
        raw_id: Option<&str>,
        selector: Option<Selector>,
    ) -> Decision {
        if principal.is_elevated() {
            tracing::debug!(
                user_id = %principal.user_id,
                resource_type = %resource_type,
                "elevated role bypass"
            );
            return Decision::Allow;
        }

        let Some(raw_id) = raw_id else {
            return deny(principal, resource_type.as_str(), DenyReason::MissingIdentifier, &"no identifier in request");
        };

        match self.resolve_owners(resource_type, raw_id, selector).await {
            Ok(owners) if owners.iter().any(|owner| principal.owns(owner)) => {
                tracing::debug!(
                    user_id = %principal.user_id,
                    resource_type = %resource_type,
                    resource_id = %raw_id,
                    "ownership confirmed"
                );
                Decision::Allow
            }
            Ok(owners) => {
                let owners: Vec<&str> = owners.iter().map(UserId::as_str).collect();
                deny(
                    principal,
                    resource_type.as_str(),
                    DenyReason::OwnershipMismatch,
                    &format!("{resource_type} {raw_id} is owned by {}", owners.join(", ")),
                )
            }
            Err(err) => deny(principal, resource_type.as_str(), DenyReason::from(&err), &err),
        }
    }

    /// Same as [`authorize`](Self::authorize) for callers holding raw tags.
    /// Tags outside the closed set are NotConfigured.
    async fn authorize_tagged(
        &self,
        principal: &Principal,
        resource_type: &str,
        raw_id: Option<&str>,
        selector: Option<&str>,
    ) -> Decision {
        if principal.is_elevated() {
            tracing::debug!(
                user_id = %principal.user_id,
                resource_type = %resource_type,
                "elevated role bypass"
            );
            return Decision::Allow;
        }

        let parsed_type = match resource_type.parse::<ResourceType>() {
            Ok(rt) => rt,
            Err(err) => return deny(principal, resource_type, DenyReason::NotConfigured, &err),
        };
        let parsed_selector = match selector.map(str::parse::<Selector>).transpose() {
            Ok(selector) => selector,
            Err(err) => return deny(principal, resource_type, DenyReason::NotConfigured, &err),
        };

        self.authorize(principal, parsed_type, raw_id, parsed_selector).await
    }
}

/// Default evaluator: catalog-driven resolver over an injected reader.
#[derive(Clone)]
pub struct DefaultOwnershipEvaluator {
    catalog: Arc<Catalog>,
    reader: Arc<dyn RecordReader>,
}

impl DefaultOwnershipEvaluator {
    pub fn new(catalog: Arc<Catalog>, reader: Arc<dyn RecordReader>) -> Self {
        Self { catalog, reader }
    }
}

#[async_trait]
impl OwnershipEvaluator for DefaultOwnershipEvaluator {
    async fn resolve_owner(
        &self,
        resource_type: ResourceType,
        raw_id: &str,
        selector: Option<Selector>,
    ) -> Result<UserId, ResolveError> {
        resolver::resolve_owner(self.reader.as_ref(), &self.catalog, resource_type, raw_id, selector).await
    }

    async fn resolve_owners(
        &self,
        resource_type: ResourceType,
        raw_id: &str,
        selector: Option<Selector>,
    ) -> Result<Vec<UserId>, ResolveError> {
        resolver::resolve_owners(self.reader.as_ref(), &self.catalog, resource_type, raw_id, selector).await
    }
}
