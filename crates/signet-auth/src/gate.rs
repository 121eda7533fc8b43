//! Authentication gate middleware for Axum
//!
//! Tower layers that authenticate every request before it reaches a
//! handler:
//! - [`DualAuthLayer`]: API key first, then client certificate
//! - [`ApiKeyOnlyLayer`]: API key with required scope
//! - [`MtlsOnlyLayer`]: client certificate
//!
//! On success the identity is attached to the request extensions
//! ([`AuthOutcome`], [`OrgId`], [`AuthMethod`], plus [`ApiKeyId`] or
//! [`CertFingerprint`]). On failure the request never reaches the inner
//! service and the client gets a JSON-RPC error body. Rejection messages
//! are generic; the precise reason is only logged.

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, Extensions, HeaderMap, StatusCode},
    response::Response,
};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use uuid::Uuid;

use crate::api_key::KeyValidator;
use crate::authz::has_any_scope;
use crate::error::{AuthError, AuthResult, RpcErrorResponse, RPC_FORBIDDEN, RPC_UNAUTHORIZED};
use crate::mtls::{MtlsAuthenticator, PeerCertificates};
use crate::types::{truncate_identifier, ApiKeyId, AuthMethod, AuthOutcome, CertFingerprint, OrgId};

/// Header carrying a bare API key
pub const API_KEY_HEADER: &str = "X-API-Key";

pub const MSG_DUAL_REQUIRED: &str = "Unauthorized: valid API key or client certificate required";
pub const MSG_API_KEY_REQUIRED: &str = "Unauthorized: API key required";
pub const MSG_INVALID_API_KEY: &str = "Unauthorized: invalid API key";
pub const MSG_CERT_REQUIRED: &str = "Unauthorized: valid client certificate required";
pub const MSG_MISSING_SCOPE: &str = "Forbidden: API key missing required scope";

// =============================================================================
// Gate core
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateMode {
    Dual,
    ApiKeyOnly,
    MtlsOnly,
}

/// Why the gate refused a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateRejection {
    Unauthorized(&'static str),
    Forbidden(&'static str),
}

impl GateRejection {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized(msg) => rpc_error_response(StatusCode::UNAUTHORIZED, RPC_UNAUTHORIZED, msg),
            Self::Forbidden(msg) => rpc_error_response(StatusCode::FORBIDDEN, RPC_FORBIDDEN, msg),
        }
    }
}

struct Gate {
    mode: GateMode,
    api_keys: Option<Arc<dyn KeyValidator>>,
    mtls: Option<MtlsAuthenticator>,
    required_scopes: Vec<String>,
}

impl Gate {
    async fn authenticate(
        &self,
        headers: &HeaderMap,
        peer: Option<&PeerCertificates>,
    ) -> Result<AuthOutcome, GateRejection> {
        match self.mode {
            GateMode::Dual => self.dual(headers, peer).await,
            GateMode::ApiKeyOnly => self.api_key_only(headers).await,
            GateMode::MtlsOnly => self.mtls_only(peer).await,
        }
    }

    async fn dual(
        &self,
        headers: &HeaderMap,
        peer: Option<&PeerCertificates>,
    ) -> Result<AuthOutcome, GateRejection> {
        let mut scope_denied = false;

        if let (Some(validator), Some(raw)) = (&self.api_keys, extract_api_key(headers)) {
            match authenticate_api_key(validator.as_ref(), &raw, &self.required_scopes).await {
                Ok(outcome) => return Ok(outcome),
                Err(AuthError::MissingScope) => {
                    tracing::warn!(
                        identifier = %truncate_identifier(&raw, 12),
                        "API key missing required scope"
                    );
                    scope_denied = true;
                }
                Err(e) => {
                    tracing::warn!(
                        identifier = %truncate_identifier(&raw, 12),
                        reason = %e,
                        "API key authentication failed"
                    );
                }
            }
        }

        if let Some(mtls) = self.mtls.as_ref().filter(|m| m.is_enabled()) {
            if peer.is_some_and(|p| !p.is_empty()) {
                match mtls.authenticate(peer).await {
                    Ok(outcome) => return Ok(outcome),
                    Err(e) => {
                        tracing::warn!(reason = %e, "Client certificate authentication failed");
                    }
                }
            }
        }

        if scope_denied {
            Err(GateRejection::Forbidden(MSG_MISSING_SCOPE))
        } else {
            Err(GateRejection::Unauthorized(MSG_DUAL_REQUIRED))
        }
    }

    async fn api_key_only(&self, headers: &HeaderMap) -> Result<AuthOutcome, GateRejection> {
        let validator = self
            .api_keys
            .as_ref()
            .ok_or(GateRejection::Unauthorized(MSG_API_KEY_REQUIRED))?;
        let raw = extract_api_key(headers).ok_or(GateRejection::Unauthorized(MSG_API_KEY_REQUIRED))?;

        match authenticate_api_key(validator.as_ref(), &raw, &self.required_scopes).await {
            Ok(outcome) => Ok(outcome),
            Err(AuthError::MissingScope) => {
                tracing::warn!(
                    identifier = %truncate_identifier(&raw, 12),
                    "API key missing required scope"
                );
                Err(GateRejection::Forbidden(MSG_MISSING_SCOPE))
            }
            Err(e) => {
                tracing::warn!(
                    identifier = %truncate_identifier(&raw, 12),
                    reason = %e,
                    "API key authentication failed"
                );
                Err(GateRejection::Unauthorized(MSG_INVALID_API_KEY))
            }
        }
    }

    async fn mtls_only(&self, peer: Option<&PeerCertificates>) -> Result<AuthOutcome, GateRejection> {
        let mtls = self
            .mtls
            .as_ref()
            .filter(|m| m.is_enabled())
            .ok_or(GateRejection::Unauthorized(MSG_CERT_REQUIRED))?;

        mtls.authenticate(peer).await.map_err(|e| {
            tracing::warn!(reason = %e, "Client certificate authentication failed");
            GateRejection::Unauthorized(MSG_CERT_REQUIRED)
        })
    }
}

/// Validate a raw key and require one of `required_scopes`
pub async fn authenticate_api_key(
    validator: &dyn KeyValidator,
    raw_key: &str,
    required_scopes: &[String],
) -> AuthResult<AuthOutcome> {
    let key = validator.validate(raw_key).await?;

    if !has_any_scope(&key.scopes, required_scopes) {
        return Err(AuthError::MissingScope);
    }

    Ok(AuthOutcome::from_api_key(&key, raw_key))
}

/// Pull an API key out of the request headers
///
/// Precedence: `Authorization: Bearer <key>`, `Authorization: ApiKey <key>`,
/// then `X-API-Key: <key>`. Empty values are skipped.
pub fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    let from_authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| {
            auth.strip_prefix("Bearer ")
                .or_else(|| auth.strip_prefix("ApiKey "))
        })
        .map(str::trim)
        .filter(|k| !k.is_empty());

    from_authorization
        .or_else(|| {
            headers
                .get(API_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|k| !k.is_empty())
        })
        .map(String::from)
}

fn insert_identity(extensions: &mut Extensions, outcome: AuthOutcome) {
    extensions.insert(OrgId(outcome.org_id));
    extensions.insert(outcome.method);
    if let Some(id) = outcome.api_key_id {
        extensions.insert(ApiKeyId(id));
    }
    if let Some(fp) = &outcome.cert_fingerprint {
        extensions.insert(CertFingerprint(fp.clone()));
    }
    extensions.insert(outcome);
}

// =============================================================================
// Layers
// =============================================================================

/// API key or client certificate
#[derive(Clone)]
pub struct DualAuthLayer {
    gate: Arc<Gate>,
}

impl DualAuthLayer {
    pub fn new(
        api_keys: Arc<dyn KeyValidator>,
        mtls: MtlsAuthenticator,
        required_scopes: Vec<String>,
    ) -> Self {
        Self {
            gate: Arc::new(Gate {
                mode: GateMode::Dual,
                api_keys: Some(api_keys),
                mtls: Some(mtls),
                required_scopes,
            }),
        }
    }
}

/// API key with a required scope
#[derive(Clone)]
pub struct ApiKeyOnlyLayer {
    gate: Arc<Gate>,
}

impl ApiKeyOnlyLayer {
    pub fn new(api_keys: Arc<dyn KeyValidator>, required_scopes: Vec<String>) -> Self {
        Self {
            gate: Arc::new(Gate {
                mode: GateMode::ApiKeyOnly,
                api_keys: Some(api_keys),
                mtls: None,
                required_scopes,
            }),
        }
    }
}

/// Client certificate
#[derive(Clone)]
pub struct MtlsOnlyLayer {
    gate: Arc<Gate>,
}

impl MtlsOnlyLayer {
    pub fn new(mtls: MtlsAuthenticator) -> Self {
        Self {
            gate: Arc::new(Gate {
                mode: GateMode::MtlsOnly,
                api_keys: None,
                mtls: Some(mtls),
                required_scopes: Vec::new(),
            }),
        }
    }
}

macro_rules! impl_gate_layer {
    ($($layer:ty),*) => {$(
        impl<S> Layer<S> for $layer {
            type Service = AuthGateMiddleware<S>;

            fn layer(&self, inner: S) -> Self::Service {
                AuthGateMiddleware {
                    inner,
                    gate: self.gate.clone(),
                }
            }
        }
    )*};
}

impl_gate_layer!(DualAuthLayer, ApiKeyOnlyLayer, MtlsOnlyLayer);

/// Authentication gate service
#[derive(Clone)]
pub struct AuthGateMiddleware<S> {
    inner: S,
    gate: Arc<Gate>,
}

impl<S> Service<Request> for AuthGateMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let gate = self.gate.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let peer = req.extensions().get::<PeerCertificates>().cloned();

            match gate.authenticate(req.headers(), peer.as_ref()).await {
                Ok(outcome) => {
                    tracing::debug!(
                        method = %outcome.method,
                        org_id = %outcome.org_id,
                        identifier = %outcome.identifier,
                        "Request authenticated"
                    );
                    let (mut parts, body) = req.into_parts();
                    insert_identity(&mut parts.extensions, outcome);
                    inner.call(Request::from_parts(parts, body)).await
                }
                Err(rejection) => Ok(rejection.into_response()),
            }
        })
    }
}

/// JSON-RPC error response with `id: null`
pub fn rpc_error_response(status: StatusCode, code: i32, message: &str) -> Response {
    let body = RpcErrorResponse::new(code, message);

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap_or_default()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

// =============================================================================
// Accessors
// =============================================================================

/// Authenticated organization
pub fn org_id(extensions: &Extensions) -> Option<Uuid> {
    extensions.get::<OrgId>().map(|o| o.0)
}

/// How the request authenticated
pub fn auth_method(extensions: &Extensions) -> Option<AuthMethod> {
    extensions.get::<AuthMethod>().copied()
}

/// Key that authenticated the request, for API key requests
pub fn api_key_id(extensions: &Extensions) -> Option<Uuid> {
    extensions.get::<ApiKeyId>().map(|k| k.0)
}

/// Client certificate fingerprint, for mTLS requests
pub fn cert_fingerprint(extensions: &Extensions) -> Option<String> {
    extensions.get::<CertFingerprint>().map(|c| c.0.clone())
}

// =============================================================================
// Axum Extractors
// =============================================================================

/// Authentication outcome, if the request passed a gate
pub struct OptionalAuth(pub Option<AuthOutcome>);

#[async_trait]
impl<S> FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuth(parts.extensions.get::<AuthOutcome>().cloned()))
    }
}

/// Authentication outcome; 401 if absent
pub struct RequireAuth(pub AuthOutcome);

#[async_trait]
impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthOutcome>()
            .cloned()
            .map(RequireAuth)
            .ok_or_else(|| GateRejection::Unauthorized(MSG_DUAL_REQUIRED).into_response())
    }
}

/// Authenticated organization id; 401 if absent
pub struct RequireOrg(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for RequireOrg
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        org_id(&parts.extensions)
            .map(RequireOrg)
            .ok_or_else(|| GateRejection::Unauthorized(MSG_DUAL_REQUIRED).into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ApiKey;
    use chrono::Utc;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_extract_api_key_precedence() {
        assert_eq!(
            extract_api_key(&headers(&[("Authorization", "Bearer aaa"), ("X-API-Key", "bbb")])),
            Some("aaa".to_string())
        );
        assert_eq!(
            extract_api_key(&headers(&[("Authorization", "ApiKey ccc")])),
            Some("ccc".to_string())
        );
        assert_eq!(
            extract_api_key(&headers(&[("Authorization", "Basic dXNlcg=="), ("X-API-Key", "ddd")])),
            Some("ddd".to_string())
        );
        assert_eq!(
            extract_api_key(&headers(&[("Authorization", "Bearer "), ("x-api-key", "eee")])),
            Some("eee".to_string())
        );
        assert_eq!(extract_api_key(&headers(&[("X-API-Key", "")])), None);
        assert_eq!(extract_api_key(&HeaderMap::new()), None);
    }

    #[test]
    fn test_rejection_responses() {
        let response = GateRejection::Unauthorized(MSG_DUAL_REQUIRED).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let response = GateRejection::Forbidden(MSG_MISSING_SCOPE).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_insert_identity_and_accessors() {
        let org = Uuid::new_v4();
        let key_id = Uuid::new_v4();
        let mut ext = Extensions::new();
        insert_identity(
            &mut ext,
            AuthOutcome {
                org_id: org,
                method: AuthMethod::ApiKey,
                identifier: "psk_live_abc...".to_string(),
                api_key_id: Some(key_id),
                cert_fingerprint: None,
            },
        );

        assert_eq!(org_id(&ext), Some(org));
        assert_eq!(auth_method(&ext), Some(AuthMethod::ApiKey));
        assert_eq!(api_key_id(&ext), Some(key_id));
        assert_eq!(cert_fingerprint(&ext), None);
        assert!(ext.get::<AuthOutcome>().is_some());

        let empty = Extensions::new();
        assert_eq!(org_id(&empty), None);
        assert_eq!(auth_method(&empty), None);
    }

    struct StaticValidator(Vec<String>);

    #[async_trait]
    impl KeyValidator for StaticValidator {
        async fn validate(&self, raw_key: &str) -> AuthResult<ApiKey> {
            if raw_key != "psk_live_good" {
                return Err(AuthError::InvalidApiKey);
            }
            Ok(ApiKey {
                id: Uuid::nil(),
                org_id: Uuid::nil(),
                user_id: None,
                name: "static".to_string(),
                key_prefix: "psk_live_good".to_string(),
                key_hash: String::new(),
                scopes: self.0.clone(),
                last_used_at: None,
                expires_at: None,
                revoked_at: None,
                created_at: Utc::now(),
            })
        }
    }

    #[tokio::test]
    async fn test_authenticate_api_key_scopes() {
        let required = vec!["keys:sign:evm".to_string(), "keys:sign".to_string()];

        let signer = StaticValidator(vec!["keys:sign".to_string()]);
        let outcome = authenticate_api_key(&signer, "psk_live_good", &required)
            .await
            .unwrap();
        assert_eq!(outcome.method, AuthMethod::ApiKey);
        assert_eq!(outcome.identifier, "psk_live_goo...");
        assert_eq!(outcome.api_key_id, Some(Uuid::nil()));

        let wildcard = StaticValidator(vec!["*".to_string()]);
        assert!(authenticate_api_key(&wildcard, "psk_live_good", &required)
            .await
            .is_ok());

        let reader = StaticValidator(vec!["keys:read".to_string()]);
        assert!(matches!(
            authenticate_api_key(&reader, "psk_live_good", &required).await,
            Err(AuthError::MissingScope)
        ));

        assert!(matches!(
            authenticate_api_key(&signer, "psk_live_bad", &required).await,
            Err(AuthError::InvalidApiKey)
        ));
    }
}
