/// Middleware modules for the API server
///
/// This module contains custom middleware for:
/// - Credential resolution (API key, signed token, admin)
/// - Security headers

pub mod auth;
pub mod security;
