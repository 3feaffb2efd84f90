//! Route authorization
//!
//! Routes declare the permission they require as an extension; the
//! authorization middleware resolves it against the policy backend.
//! Denials and backend failures are indistinguishable to the caller:
//! both answer `Forbidden`.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use crate::backend::RequestContext;
use crate::error::Error;
use crate::gateway::GatewayState;

/// Permission a route requires, attached via `Extension`
#[derive(Debug, Clone)]
pub struct RequiredPermission {
    pub resource: &'static str,
    pub action: &'static str,
}

impl RequiredPermission {
    pub const fn new(resource: &'static str, action: &'static str) -> Self {
        Self { resource, action }
    }
}

/// HTTP authorization middleware, fail-closed
///
/// Must run after [`crate::auth::authentication`]; a request without an
/// identity is rejected outright. Routes without a declared permission
/// pass through.
pub async fn authorization(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, Error> {
    let Some(required) = request.extensions().get::<RequiredPermission>().cloned() else {
        return Ok(next.run(request).await);
    };

    let ctx = request
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .ok_or_else(|| Error::Unauthenticated("authorization requires identity".to_string()))?;
    let user = ctx
        .user
        .clone()
        .ok_or_else(|| Error::Unauthenticated("authorization requires identity".to_string()))?;

    let allowed = state
        .services
        .policy
        .check_permission(&ctx, &user.user_id, required.resource, required.action)
        .await
        .unwrap_or_else(|e| {
            warn!(
                user_id = %user.user_id,
                resource = required.resource,
                action = required.action,
                error = %e,
                "Permission check failed, denying"
            );
            false
        });

    if !allowed {
        return Err(Error::Forbidden(format!(
            "{} may not {} {}",
            user.username, required.action, required.resource
        )));
    }

    Ok(next.run(request).await)
}
