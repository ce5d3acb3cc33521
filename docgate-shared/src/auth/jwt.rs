/// Signed token verification
///
/// Validates externally issued RS256 tokens against the issuer's published
/// key set. Tokens are never minted by docgate; the identity provider signs
/// them and publishes the matching public keys as a JWKS document.
///
/// # Verification Steps
///
/// 1. Header algorithm must be RS256
/// 2. Header must carry a `kid`
/// 3. Verifying key is looked up by `kid` in the issuer's key set (cached)
/// 4. Signature, `exp` and `iss` are validated
/// 5. The `email` claim must be present and non-empty
///
/// # Example
///
/// ```no_run
/// use docgate_shared::auth::jwks::{HttpKeySetSource, KeySetCache};
/// use docgate_shared::auth::jwt::SignedTokenVerifier;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example(token: &str) -> Result<(), Box<dyn std::error::Error>> {
/// let source = HttpKeySetSource::new(None)?;
/// let cache = KeySetCache::new(Arc::new(source), Duration::from_secs(3600));
/// let verifier = SignedTokenVerifier::new("https://example.kinde.com", cache);
///
/// let claims = verifier.verify(token).await?;
/// println!("Signed in as {:?}", claims.email());
/// # Ok(())
/// # }
/// ```

use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::{Deserialize, Serialize};

use super::jwks::KeySetCache;

/// Role key that grants admin access
pub const ADMIN_ROLE: &str = "admin";

/// Error type for signed token verification
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Token could not be parsed
    #[error("Invalid token format: {0}")]
    InvalidFormat(String),

    /// Token is not signed with RS256
    #[error("Unsupported signing algorithm: {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    /// Token header carries no key id
    #[error("Token header is missing a key id")]
    MissingKeyId,

    /// No published key matches the header's key id
    #[error("No published key matches key id {0}")]
    UnknownKeyId(String),

    /// Published key cannot be used for RS256 verification
    #[error("Unsupported key: {0}")]
    UnsupportedKey(String),

    /// Key set could not be fetched or parsed
    #[error("Key set unavailable: {0}")]
    KeySetUnavailable(String),

    /// Token has expired
    #[error("Token has expired")]
    Expired,

    /// Issuer claim does not match the trusted issuer
    #[error("Invalid issuer: expected {expected}")]
    InvalidIssuer { expected: String },

    /// Email claim missing or empty
    #[error("Token is missing the email claim")]
    MissingEmail,

    /// Signature or claim validation failed
    #[error("Failed to validate token: {0}")]
    ValidationError(String),
}

/// Role entry in the `roles` claim
///
/// Identity providers publish roles either as plain strings or as objects
/// carrying a `key`; both forms are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoleClaim {
    /// `"admin"`
    Key(String),

    /// `{"id": "...", "key": "admin", "name": "Admin"}`
    Object {
        key: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl RoleClaim {
    /// Returns the role key
    pub fn key(&self) -> &str {
        match self {
            RoleClaim::Key(key) => key,
            RoleClaim::Object { key, .. } => key,
        }
    }
}

/// Claims carried by a signed token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (identity provider user id)
    pub sub: String,

    /// Subject email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Issuer
    pub iss: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Assigned roles
    #[serde(default)]
    pub roles: Vec<RoleClaim>,
}

impl Claims {
    /// Returns the trimmed email claim, `None` if absent or blank
    pub fn email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }

    /// Whether any role grants admin access
    pub fn is_admin(&self) -> bool {
        self.roles
            .iter()
            .any(|role| role.key().eq_ignore_ascii_case(ADMIN_ROLE))
    }
}

/// Verifies signed tokens for one trusted issuer
pub struct SignedTokenVerifier {
    /// Trusted issuer (`iss` must match exactly)
    issuer: String,

    /// Cached published keys
    keys: KeySetCache,
}

impl SignedTokenVerifier {
    /// Creates a verifier for the given issuer
    pub fn new(issuer: impl Into<String>, keys: KeySetCache) -> Self {
        Self {
            issuer: issuer.into(),
            keys,
        }
    }

    /// Trusted issuer
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Verifies a token and returns its claims
    ///
    /// # Errors
    ///
    /// Any failure (format, algorithm, key id, key set, signature, expiry,
    /// issuer, missing email) is reported as a [`JwtError`]; callers map all of
    /// them to an invalid credential.
    pub async fn verify(&self, token: &str) -> Result<Claims, JwtError> {
        let header = decode_header(token).map_err(|e| JwtError::InvalidFormat(e.to_string()))?;

        if header.alg != Algorithm::RS256 {
            return Err(JwtError::UnsupportedAlgorithm(header.alg));
        }

        let kid = header
            .kid
            .filter(|kid| !kid.is_empty())
            .ok_or(JwtError::MissingKeyId)?;

        let key = self.keys.decoding_key(&self.issuer, &kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.validate_exp = true;
        validation.validate_aud = false;

        let token_data = decode::<Claims>(token, &key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
            jsonwebtoken::errors::ErrorKind::InvalidIssuer => JwtError::InvalidIssuer {
                expected: self.issuer.clone(),
            },
            _ => JwtError::ValidationError(e.to_string()),
        })?;

        if token_data.claims.email().is_none() {
            return Err(JwtError::MissingEmail);
        }

        Ok(token_data.claims)
    }
}
