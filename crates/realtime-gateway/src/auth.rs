//! Session authentication
//!
//! One verification pipeline serves both the HTTP guard and the
//! WebSocket handshake: strip the bearer prefix, reject blacklisted
//! tokens, verify the signature and expiry, then resolve the identity
//! through the cache-aside store.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{AuthBackend, RequestContext, UserContext};
use crate::error::{Error, Result};
use crate::gateway::GatewayState;
use crate::store::{self, keys, SharedStore};

/// Cached identities live this long
pub const USER_INFO_TTL: Duration = Duration::from_secs(3600);

const BEARER_PREFIX: &str = "Bearer ";

/// How the authentication guard treats a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Full verification: blacklist, signature, identity resolution
    #[default]
    Standard,
    /// Token rotation: the access token is expected to be expired, so
    /// only the request shape is validated
    Rotation,
}

/// Access-token claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Opaque user slug, the only identity datum a token carries
    #[serde(rename = "slugId")]
    pub slug_id: String,
    pub exp: i64,
}

/// Verifies access tokens and consults the blacklist
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Strip the `Bearer ` prefix, rejecting anything else
    pub fn strip_bearer(raw: &str) -> Result<&str> {
        raw.strip_prefix(BEARER_PREFIX)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Unauthenticated("missing bearer token".to_string()))
    }

    /// Verify signature and expiry; any failure is a policy rejection
    pub fn verify(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "Token verification failed");
                Error::Forbidden("invalid token".to_string())
            })
    }

    /// Blacklist check; runs before signature verification so revoked
    /// tokens are rejected even if they would not verify
    pub async fn check_blacklist(&self, store: &dyn SharedStore, token: &str) -> Result<()> {
        if store.exists(&keys::blacklisted_token(token)).await? {
            return Err(Error::Forbidden("token revoked".to_string()));
        }
        Ok(())
    }
}

/// Resolves slug IDs to full identities through the shared-store cache
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn SharedStore>,
    backend: Arc<dyn AuthBackend>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn SharedStore>, backend: Arc<dyn AuthBackend>) -> Self {
        Self { store, backend }
    }

    /// Cache-aside lookup; misses hit the auth backend
    pub async fn resolve(&self, ctx: &RequestContext, slug_id: &str) -> Result<Arc<UserContext>> {
        let user: UserContext = store::get_or_set(
            self.store.as_ref(),
            &keys::user_info(slug_id),
            USER_INFO_TTL,
            || async { self.backend.get_user_from_slug(ctx, slug_id).await },
        )
        .await?;
        Ok(Arc::new(user))
    }

    /// Bulk cache-aside lookup; all cache misses go to the backend in a
    /// single call. Fails if any of the requested users do not exist.
    pub async fn resolve_many(
        &self,
        ctx: &RequestContext,
        slug_ids: &[String],
    ) -> Result<Vec<Arc<UserContext>>> {
        let mut resolved: Vec<Option<Arc<UserContext>>> = vec![None; slug_ids.len()];
        let mut misses: Vec<(usize, String)> = Vec::new();

        for (i, slug_id) in slug_ids.iter().enumerate() {
            let key = keys::user_info(slug_id);
            match self.store.get(&key).await {
                Ok(Some(raw)) => match serde_json::from_str::<UserContext>(&raw) {
                    Ok(user) => resolved[i] = Some(Arc::new(user)),
                    Err(e) => {
                        warn!(key, error = %e, "Discarding undecodable cache entry");
                        misses.push((i, slug_id.clone()));
                    }
                },
                Ok(None) => misses.push((i, slug_id.clone())),
                Err(e) => {
                    warn!(key, error = %e, "Cache read failed, falling through to backend");
                    misses.push((i, slug_id.clone()));
                }
            }
        }

        if !misses.is_empty() {
            let slugs: Vec<String> = misses.iter().map(|(_, slug)| slug.clone()).collect();
            let users = self.backend.get_users_from_slugs(ctx, &slugs).await?;
            if users.len() != slugs.len() {
                return Err(Error::NotFound(format!(
                    "unknown user among {slugs:?}"
                )));
            }
            for ((i, slug_id), user) in misses.into_iter().zip(users) {
                match serde_json::to_string(&user) {
                    Ok(raw) => {
                        let key = keys::user_info(&slug_id);
                        if let Err(e) = self.store.set(&key, &raw, Some(USER_INFO_TTL)).await {
                            warn!(key, error = %e, "Cache write failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "Cache value not serializable"),
                }
                resolved[i] = Some(Arc::new(user));
            }
        }

        Ok(resolved.into_iter().flatten().collect())
    }

    /// Evict a cached identity (e.g. after a profile change)
    pub async fn invalidate(&self, slug_id: &str) -> Result<()> {
        self.store.delete(&keys::user_info(slug_id)).await
    }
}

/// Full verification pipeline shared by the HTTP guard and the
/// WebSocket handshake
pub async fn authenticate_token(
    verifier: &TokenVerifier,
    resolver: &IdentityResolver,
    store: &dyn SharedStore,
    ctx: &RequestContext,
    raw: &str,
) -> Result<Arc<UserContext>> {
    let token = TokenVerifier::strip_bearer(raw)?;
    verifier.check_blacklist(store, token).await?;
    let claims = verifier.verify(token)?;
    resolver.resolve(ctx, &claims.slug_id).await
}

/// HTTP authentication middleware
///
/// Attaches a [`RequestContext`] extension carrying the resolved
/// identity; standard mode resolves it from the verified token, rotation
/// mode from the user the body names.
pub async fn authentication(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, Error> {
    let mode = request
        .extensions()
        .get::<AuthMode>()
        .copied()
        .unwrap_or_default();

    match mode {
        AuthMode::Standard => standard_auth(state, request, next).await,
        AuthMode::Rotation => rotation_auth(state, request, next).await,
    }
}

/// Seed a context from the propagation headers, generating what is absent
fn context_from_headers(request: &Request) -> RequestContext {
    let mut ctx = RequestContext::new();
    if let Some(trace_id) = header_value(request, "x-trace-id") {
        ctx.trace_id = trace_id;
    }
    if let Some(session_id) = header_value(request, "x-session-id") {
        ctx.session_id = session_id;
    }
    ctx
}

fn header_value(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

async fn standard_auth(
    state: GatewayState,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, Error> {
    let raw = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Unauthenticated("missing authorization header".to_string()))?
        .to_string();

    let ctx = context_from_headers(&request);
    let services = &state.services;
    let user = authenticate_token(
        &services.verifier,
        &services.identity,
        services.store.as_ref(),
        &ctx,
        &raw,
    )
    .await?;

    let ctx = RequestContext {
        user: Some(user),
        ..ctx
    };
    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}

/// Rotation-mode guard: the access token is expired by definition, so
/// the identity is resolved from the user named in the body instead of
/// from token claims
async fn rotation_auth(
    state: GatewayState,
    request: Request,
    next: Next,
) -> std::result::Result<Response, Error> {
    let ctx = context_from_headers(&request);
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, 64 * 1024)
        .await
        .map_err(|e| Error::InvalidArgument(format!("unreadable body: {e}")))?;

    let parsed: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|_| Error::InvalidArgument("rotation request must be JSON".to_string()))?;
    let user_id = parsed
        .get("userId")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::InvalidArgument("rotation request missing userId".to_string()))?;
    debug!(user_id, "Token rotation request");

    let user = state.services.identity.resolve(&ctx, user_id).await?;
    let ctx = RequestContext {
        user: Some(user),
        ..ctx
    };

    let mut request = Request::from_parts(parts, Body::from(bytes));
    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}
