/// Authentication utilities
///
/// # Modules
///
/// - [`api_key`]: Opaque key generation, hashing and format checks
/// - [`jwt`]: RS256 signed-token verification
/// - [`jwks`]: Published key sets and the per-issuer key cache
/// - [`middleware`]: Identity resolution for both credential kinds
///
/// # Security Features
///
/// - **Opaque keys**: 32 random bytes, stored only as SHA-256 digests
/// - **Signed tokens**: asymmetric (RS256) only, `kid` required, issuer pinned
/// - **Constant-time comparison** of stored and computed key digests

pub mod api_key;
pub mod jwks;
pub mod jwt;
pub mod middleware;
