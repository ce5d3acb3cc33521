/// Identity resolution
///
/// Turns an `Authorization` header into an [`AuthContext`]. Two credential
/// kinds share the `Bearer` scheme and are told apart by shape:
///
/// - **Opaque key**: `ak_live_` + 64 lowercase hex chars, looked up by SHA-256 hash
/// - **Signed token**: anything else, verified as an RS256 token against the
///   issuer's published keys
///
/// The API crate wraps [`IdentityResolver::resolve`] in axum middleware and
/// inserts the resulting `AuthContext` into request extensions.
///
/// # Example
///
/// ```no_run
/// use docgate_shared::auth::middleware::{CredentialPolicy, IdentityResolver};
///
/// # async fn example(resolver: IdentityResolver) {
/// match resolver.resolve(Some("Bearer ak_live_..."), CredentialPolicy::Either).await {
///     Ok(auth) => println!("Authenticated {} via {}", auth.identity.email, auth.method.as_str()),
///     Err(e) => println!("Rejected: {}", e),
/// }
/// # }
/// ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::api_key::{constant_time_compare, hash_api_key, validate_api_key_format};
use super::jwt::SignedTokenVerifier;
use crate::store::KeyStore;

/// Budget for the detached usage-counter update
const RECORD_USE_TIMEOUT: Duration = Duration::from_secs(5);

/// Authentication method used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Externally issued signed token
    SignedToken,

    /// Opaque API key
    OpaqueKey,
}

impl AuthMethod {
    /// Tag stored on usage records
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::SignedToken => "bearer_token",
            AuthMethod::OpaqueKey => "api_key",
        }
    }

    /// Method a header would authenticate with, judged by shape alone
    ///
    /// `None` for a missing or malformed header.
    pub fn of_header(header: Option<&str>) -> Option<AuthMethod> {
        let credential = bearer_credential(header?).ok()?;
        if validate_api_key_format(credential) {
            Some(AuthMethod::OpaqueKey)
        } else {
            Some(AuthMethod::SignedToken)
        }
    }
}

fn bearer_credential(header: &str) -> Result<&str, AuthError> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(AuthError::MalformedCredential)
}

/// Who is calling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Account id, known up front only for opaque keys
    pub account_id: Option<String>,

    pub email: String,

    /// Token subject, or the key id for opaque keys
    pub subject: String,

    pub is_admin: bool,
}

/// Authentication context added to request extensions
///
/// ```
/// use axum::Extension;
/// use docgate_shared::auth::middleware::AuthContext;
///
/// async fn handler(Extension(auth): Extension<AuthContext>) -> String {
///     format!("Caller: {}", auth.identity.email)
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub identity: Identity,
    pub method: AuthMethod,
}

/// Which credentials an endpoint accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialPolicy {
    /// Opaque keys and signed tokens (operation endpoints)
    Either,

    /// Signed tokens only (account management)
    SignedTokenOnly,
}

/// Error type for authentication
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authorization header is required")]
    MissingCredential,

    #[error("Authorization header must be 'Bearer <credential>'")]
    MalformedCredential,

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Authentication failed: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingCredential
            | AuthError::MalformedCredential
            | AuthError::InvalidCredential(_) => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing_credential",
            AuthError::MalformedCredential => "malformed_credential",
            AuthError::InvalidCredential(_) => "invalid_credential",
            AuthError::Forbidden(_) => "forbidden",
            AuthError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match &self {
            AuthError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "error": self.error_code(),
            "message": message,
        });

        (self.status_code(), Json(body)).into_response()
    }
}

/// Resolves credentials into identities
#[derive(Clone)]
pub struct IdentityResolver {
    keys: Arc<dyn KeyStore>,
    verifier: Arc<SignedTokenVerifier>,
}

impl IdentityResolver {
    pub fn new(keys: Arc<dyn KeyStore>, verifier: Arc<SignedTokenVerifier>) -> Self {
        Self { keys, verifier }
    }

    /// Resolves an `Authorization` header value under a policy
    pub async fn resolve(
        &self,
        header: Option<&str>,
        policy: CredentialPolicy,
    ) -> Result<AuthContext, AuthError> {
        let header = header.ok_or(AuthError::MissingCredential)?;
        let credential = bearer_credential(header)?;

        if validate_api_key_format(credential) {
            if policy == CredentialPolicy::SignedTokenOnly {
                return Err(AuthError::InvalidCredential(
                    "this endpoint requires a signed-in user token".to_string(),
                ));
            }
            return self.resolve_opaque_key(credential).await;
        }

        self.resolve_signed_token(credential).await
    }

    /// Rejects non-admin callers
    pub fn require_admin(auth: &AuthContext) -> Result<(), AuthError> {
        if auth.method == AuthMethod::SignedToken && auth.identity.is_admin {
            Ok(())
        } else {
            Err(AuthError::Forbidden("Admin access required".to_string()))
        }
    }

    async fn resolve_opaque_key(&self, key: &str) -> Result<AuthContext, AuthError> {
        let key_hash = hash_api_key(key);

        let api_key = self
            .keys
            .get_active_by_hash(&key_hash)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?
            .filter(|stored| constant_time_compare(&stored.key_hash, &key_hash) && stored.is_usable())
            .ok_or_else(|| AuthError::InvalidCredential("invalid, inactive or expired API key".to_string()))?;

        let keys = self.keys.clone();
        let key_id = api_key.id;
        tokio::spawn(async move {
            match tokio::time::timeout(RECORD_USE_TIMEOUT, keys.record_use(key_id)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(key_id = %key_id, error = %e, "Failed to record API key use"),
                Err(_) => warn!(key_id = %key_id, "Timed out recording API key use"),
            }
        });

        debug!(user_id = %api_key.user_id, key_prefix = %api_key.key_prefix, "Authenticated with API key");

        Ok(AuthContext {
            identity: Identity {
                account_id: Some(api_key.user_id),
                email: api_key.email,
                subject: api_key.id.to_string(),
                is_admin: false,
            },
            method: AuthMethod::OpaqueKey,
        })
    }

    async fn resolve_signed_token(&self, token: &str) -> Result<AuthContext, AuthError> {
        let claims = self.verifier.verify(token).await.map_err(|e| {
            debug!(error = %e, "Signed token rejected");
            AuthError::InvalidCredential(e.to_string())
        })?;

        let email = claims
            .email()
            .map(str::to_string)
            .ok_or_else(|| AuthError::InvalidCredential("token is missing the email claim".to_string()))?;

        Ok(AuthContext {
            identity: Identity {
                account_id: None,
                email,
                is_admin: claims.is_admin(),
                subject: claims.sub,
            },
            method: AuthMethod::SignedToken,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::api_key::{display_prefix, generate_api_key};
    use crate::auth::jwt::tests::{claims_for, sign, test_verifier, TEST_KID};
    use crate::models::account::CreateAccount;
    use crate::models::api_key::{CreateApiKey, UpdateApiKey};
    use crate::store::Stores;

    async fn setup() -> (Stores, IdentityResolver, String) {
        let stores = Stores::in_memory();
        stores
            .accounts
            .create(CreateAccount {
                user_id: "alice".to_string(),
                email: "alice@example.com".to_string(),
                balance: 10,
            })
            .await
            .unwrap();

        let (key, hash) = generate_api_key();
        stores
            .keys
            .create(CreateApiKey {
                user_id: "alice".to_string(),
                email: "alice@example.com".to_string(),
                key_name: "ci".to_string(),
                key_hash: hash,
                key_prefix: display_prefix(&key),
                expires_at: None,
            })
            .await
            .unwrap();

        let resolver = IdentityResolver::new(stores.keys.clone(), Arc::new(test_verifier()));
        (stores, resolver, key)
    }

    #[test]
    fn test_auth_method_tags() {
        assert_eq!(AuthMethod::SignedToken.as_str(), "bearer_token");
        assert_eq!(AuthMethod::OpaqueKey.as_str(), "api_key");
    }

    #[test]
    fn test_auth_method_of_header() {
        let (key, _) = generate_api_key();

        assert_eq!(AuthMethod::of_header(Some(&format!("Bearer {}", key))), Some(AuthMethod::OpaqueKey));
        assert_eq!(AuthMethod::of_header(Some("Bearer garbage")), Some(AuthMethod::SignedToken));
        assert_eq!(AuthMethod::of_header(Some("Basic abc")), None);
        assert_eq!(AuthMethod::of_header(Some("Bearer   ")), None);
        assert_eq!(AuthMethod::of_header(None), None);
    }

    #[tokio::test]
    async fn test_missing_and_malformed_headers() {
        let (_, resolver, _) = setup().await;

        assert!(matches!(
            resolver.resolve(None, CredentialPolicy::Either).await,
            Err(AuthError::MissingCredential)
        ));
        assert!(matches!(
            resolver.resolve(Some("Basic abc"), CredentialPolicy::Either).await,
            Err(AuthError::MalformedCredential)
        ));
        assert!(matches!(
            resolver.resolve(Some("Bearer   "), CredentialPolicy::Either).await,
            Err(AuthError::MalformedCredential)
        ));
    }

    #[tokio::test]
    async fn test_opaque_key_resolves_account() {
        let (stores, resolver, key) = setup().await;

        let auth = resolver
            .resolve(Some(&format!("Bearer {}", key)), CredentialPolicy::Either)
            .await
            .unwrap();

        assert_eq!(auth.method, AuthMethod::OpaqueKey);
        assert_eq!(auth.identity.account_id.as_deref(), Some("alice"));
        assert_eq!(auth.identity.email, "alice@example.com");
        assert!(!auth.identity.is_admin);

        // Usage counter is bumped in the background
        for _ in 0..50 {
            let stored = stores.keys.get_for_account("alice").await.unwrap().unwrap();
            if stored.usage_count == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("usage count was never bumped");
    }

    #[tokio::test]
    async fn test_opaque_key_rejected_for_signed_only() {
        let (_, resolver, key) = setup().await;

        let err = resolver
            .resolve(Some(&format!("Bearer {}", key)), CredentialPolicy::SignedTokenOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential(_)));
    }

    #[tokio::test]
    async fn test_unknown_or_disabled_key_rejected() {
        let (stores, resolver, key) = setup().await;

        let (unknown, _) = generate_api_key();
        assert!(matches!(
            resolver
                .resolve(Some(&format!("Bearer {}", unknown)), CredentialPolicy::Either)
                .await,
            Err(AuthError::InvalidCredential(_))
        ));

        stores
            .keys
            .update_for_account(
                "alice",
                UpdateApiKey {
                    key_name: None,
                    is_active: Some(false),
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            resolver
                .resolve(Some(&format!("Bearer {}", key)), CredentialPolicy::Either)
                .await,
            Err(AuthError::InvalidCredential(_))
        ));
    }

    #[tokio::test]
    async fn test_signed_token_resolves_identity() {
        let (_, resolver, _) = setup().await;
        let token = sign(
            &claims_for("bob@example.com", serde_json::json!([{"key": "admin"}])),
            Some(TEST_KID),
        );

        let auth = resolver
            .resolve(Some(&format!("Bearer {}", token)), CredentialPolicy::SignedTokenOnly)
            .await
            .unwrap();

        assert_eq!(auth.method, AuthMethod::SignedToken);
        assert_eq!(auth.identity.email, "bob@example.com");
        assert!(auth.identity.account_id.is_none());
        assert!(auth.identity.is_admin);
        assert!(IdentityResolver::require_admin(&auth).is_ok());
    }

    #[tokio::test]
    async fn test_non_admin_forbidden() {
        let (_, resolver, _) = setup().await;
        let token = sign(&claims_for("bob@example.com", serde_json::json!([])), Some(TEST_KID));

        let auth = resolver
            .resolve(Some(&format!("Bearer {}", token)), CredentialPolicy::Either)
            .await
            .unwrap();

        let err = IdentityResolver::require_admin(&auth).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_garbage_bearer_is_invalid() {
        let (_, resolver, _) = setup().await;

        let err = resolver
            .resolve(Some("Bearer not-a-token"), CredentialPolicy::Either)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_auth_error_into_response() {
        assert_eq!(
            AuthError::MissingCredential.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::Forbidden("no".to_string()).into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AuthError::Internal("db down".to_string()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
