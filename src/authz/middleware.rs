use std::sync::Arc;

use axum::body::Body;
use axum::extract::{FromRequestParts, RawPathParams, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use serde_json::Value;

use crate::app::AppState;
use crate::errors::AppError;
use crate::jwt::AuthUser;

use super::binding::{IdLocation, OwnedResource, RequestView};

const MAX_BODY_BYTES: usize = 1_048_576;

/// State for one guarded route: the shared app state plus the route's
/// ownership declaration.
#[derive(Clone)]
pub struct OwnershipGuard {
    state: AppState,
    declaration: Arc<OwnedResource>,
}

impl OwnershipGuard {
    pub fn new(state: AppState, declaration: OwnedResource) -> Self {
        Self {
            state,
            declaration: Arc::new(declaration),
        }
    }
}

/// Route layer enforcing an [`OwnedResource`] declaration.
///
/// Authentication failures stay 401. Every ownership denial is the same
/// 403, whether the resource is missing, foreign, or could not be checked.
pub async fn require_ownership(
    State(guard): State<OwnershipGuard>,
    raw_params: Option<RawPathParams>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (mut parts, body) = request.into_parts();
    let auth = AuthUser::from_request_parts(&mut parts, &guard.state).await?;

    let path_params: Vec<(&str, &str)> = raw_params.iter().flat_map(|params| params.iter()).collect();

    // The body is buffered so the identifier can be read and the handler
    // still receives the original bytes.
    let (body, payload) = match guard.declaration.location {
        IdLocation::Path => (body, None),
        IdLocation::Body => {
            let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
                .await
                .map_err(|err| AppError::bad_request(format!("failed to read request body: {err}")))?;
            let payload = serde_json::from_slice::<Value>(&bytes).ok();
            (Body::from(bytes), payload)
        }
    };

    let view = RequestView::new(&path_params, payload.as_ref());
    let decision = guard
        .declaration
        .authorize(guard.state.authz.as_ref(), &auth.principal, &view)
        .await;

    if !decision.is_allowed() {
        return Err(AppError::forbidden());
    }

    Ok(next.run(Request::from_parts(parts, body)).await)
}
