/// Published key sets (JWKS)
///
/// Fetches and caches the identity provider's public signing keys. Keys are
/// cached per issuer for a fixed TTL and re-fetched early when a token
/// references a `kid` that is not in the cached set (key rotation). Forced
/// refreshes are throttled so a stream of tokens with bogus key ids cannot
/// hammer the provider.

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::jwt::JwtError;

/// Default cache lifetime for a fetched key set
pub const DEFAULT_KEY_SET_TTL: Duration = Duration::from_secs(3600);

/// Minimum spacing between forced refreshes triggered by unknown key ids
const MIN_FORCED_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// HTTP timeout for key set downloads
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Single published key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (only `RSA` is usable)
    pub kty: String,

    /// Key id
    pub kid: String,

    /// Intended use (`sig`)
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    /// Declared algorithm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// RSA modulus (base64url)
    #[serde(default)]
    pub n: String,

    /// RSA exponent (base64url)
    #[serde(default)]
    pub e: String,
}

impl Jwk {
    /// Builds an RS256 verification key from the modulus and exponent
    pub fn decoding_key(&self) -> Result<DecodingKey, JwtError> {
        if self.kty != "RSA" {
            return Err(JwtError::UnsupportedKey(format!(
                "key {} has type {}",
                self.kid, self.kty
            )));
        }

        if let Some(alg) = self.alg.as_deref() {
            if alg != "RS256" {
                return Err(JwtError::UnsupportedKey(format!(
                    "key {} declares algorithm {}",
                    self.kid, alg
                )));
            }
        }

        DecodingKey::from_rsa_components(&self.n, &self.e)
            .map_err(|e| JwtError::UnsupportedKey(format!("key {}: {}", self.kid, e)))
    }
}

/// Published key set document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Finds a key by id
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|key| key.kid == kid)
    }
}

/// Where key sets come from
#[async_trait]
pub trait KeySetSource: Send + Sync {
    /// Fetches the current key set for an issuer
    async fn fetch(&self, issuer: &str) -> Result<JwkSet, JwtError>;
}

/// Fetches key sets over HTTPS
///
/// Uses `{issuer}/.well-known/jwks.json` unless an explicit URI is configured.
pub struct HttpKeySetSource {
    client: reqwest::Client,
    uri_override: Option<String>,
}

impl HttpKeySetSource {
    /// Creates a source with an optional fixed key set URI
    pub fn new(uri_override: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self {
            client,
            uri_override,
        })
    }

    fn uri_for(&self, issuer: &str) -> String {
        match &self.uri_override {
            Some(uri) => uri.clone(),
            None => format!("{}/.well-known/jwks.json", issuer.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    async fn fetch(&self, issuer: &str) -> Result<JwkSet, JwtError> {
        let uri = self.uri_for(issuer);
        debug!(uri = %uri, "Fetching key set");

        let response = self
            .client
            .get(&uri)
            .send()
            .await
            .map_err(|e| JwtError::KeySetUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(JwtError::KeySetUnavailable(format!(
                "{} returned {}",
                uri,
                response.status()
            )));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| JwtError::KeySetUnavailable(e.to_string()))
    }
}

/// Serves a fixed key set; counts fetches
///
/// Used by tests and by deployments that pin keys in configuration.
pub struct StaticKeySetSource {
    keys: RwLock<JwkSet>,
    fetches: AtomicUsize,
}

impl StaticKeySetSource {
    pub fn new(keys: JwkSet) -> Self {
        Self {
            keys: RwLock::new(keys),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Replaces the served key set (simulates rotation)
    pub async fn replace(&self, keys: JwkSet) {
        *self.keys.write().await = keys;
    }

    /// Number of fetches served so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySetSource for StaticKeySetSource {
    async fn fetch(&self, _issuer: &str) -> Result<JwkSet, JwtError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.keys.read().await.clone())
    }
}

struct CachedKeySet {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Per-issuer key set cache
///
/// Fetches run outside the entry map's lock. A per-issuer gate lets one
/// caller fetch while the others wait for its result, and lookups for other
/// issuers proceed meanwhile.
#[derive(Clone)]
pub struct KeySetCache {
    source: Arc<dyn KeySetSource>,
    ttl: Duration,
    entries: Arc<RwLock<HashMap<String, CachedKeySet>>>,
    refresh_gates: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl KeySetCache {
    pub fn new(source: Arc<dyn KeySetSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
            refresh_gates: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolves the verification key for `kid`
    ///
    /// Serves from cache when fresh. Refetches when the entry is stale, or
    /// when `kid` is unknown and the last fetch is older than the forced
    /// refresh interval.
    pub async fn decoding_key(&self, issuer: &str, kid: &str) -> Result<DecodingKey, JwtError> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(issuer) {
                let age = entry.fetched_at.elapsed();
                if age < self.ttl {
                    if let Some(key) = entry.keys.find(kid) {
                        return key.decoding_key();
                    }
                    if age < MIN_FORCED_REFRESH_INTERVAL {
                        return Err(JwtError::UnknownKeyId(kid.to_string()));
                    }
                }
            }
        }

        let keys = self.refresh(issuer).await?;
        match keys.find(kid) {
            Some(key) => key.decoding_key(),
            None => {
                warn!(issuer = %issuer, kid = %kid, "Token references unknown key id");
                Err(JwtError::UnknownKeyId(kid.to_string()))
            }
        }
    }

    async fn refresh(&self, issuer: &str) -> Result<JwkSet, JwtError> {
        let gate = self
            .refresh_gates
            .lock()
            .await
            .entry(issuer.to_string())
            .or_default()
            .clone();
        let _refreshing = gate.lock().await;

        // Another request may have refreshed while we waited for the gate
        if let Some(entry) = self.entries.read().await.get(issuer) {
            if entry.fetched_at.elapsed() < MIN_FORCED_REFRESH_INTERVAL {
                return Ok(entry.keys.clone());
            }
        }

        let keys = self.source.fetch(issuer).await?;
        info!(issuer = %issuer, key_count = keys.keys.len(), "Refreshed key set");

        self.entries.write().await.insert(
            issuer.to_string(),
            CachedKeySet {
                keys: keys.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(keys)
    }
}
