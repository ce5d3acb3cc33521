/// API route handlers
///
/// Handlers are organized by resource:
///
/// - `health`: Health check endpoint
/// - `operations`: Metered document-processing operations
/// - `users`: Registration
/// - `credits`: Balance, deduction and admin top-ups
/// - `api_keys`: API key management
/// - `tokens`: Redeemable credit tokens
/// - `usage`: Usage analytics

pub mod api_keys;
pub mod credits;
pub mod health;
pub mod operations;
pub mod tokens;
pub mod usage;
pub mod users;
