/// Redeemable credit tokens
///
/// Admins generate single-use codes worth a fixed number of credits. A
/// redemption first flips the token to used with a conditional update and only
/// then credits the redeemer, so two concurrent redemptions of one code can
/// never both pay out.
///
/// # Example
///
/// ```
/// use docgate_shared::credit_tokens::TokenService;
/// use docgate_shared::ledger::CreditLedger;
/// use docgate_shared::models::account::CreateAccount;
/// use docgate_shared::store::Stores;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let stores = Stores::in_memory();
/// stores.accounts.create(CreateAccount {
///     user_id: "alice".to_string(),
///     email: "alice@example.com".to_string(),
///     balance: 0,
/// }).await?;
///
/// let tokens = TokenService::new(stores.tokens.clone(), CreditLedger::new(stores.accounts.clone()));
/// let token = tokens.generate(25, None, "admin@example.com").await?;
/// let redemption = tokens.redeem(&token.code, "alice").await?;
/// assert_eq!(redemption.remaining_credits, 25);
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::ledger::{CreditLedger, LedgerError};
use crate::models::credit_token::{CreateCreditToken, CreditToken, TokenFilter};
use crate::store::{StoreError, TokenStore};

/// Lifetime of a freshly generated token
pub const TOKEN_VALIDITY_DAYS: i64 = 30;

/// Random bytes per token code (hex-encoded to 32 chars)
const TOKEN_CODE_BYTES: usize = 16;

/// Error type for credit token operations
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token not found")]
    NotFound,

    #[error("Token has already been used")]
    AlreadyUsed,

    #[error("Token has expired")]
    Expired,

    /// Only the issuing admin may delete a token
    #[error("Only the creator of a token can delete it")]
    NotCreator,

    #[error("Used tokens cannot be deleted")]
    UsedTokenNotDeletable,

    #[error("Credits must be at least 1, got {0}")]
    InvalidCredits(i64),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Result of a successful redemption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub token: CreditToken,
    pub credits: i64,
    pub remaining_credits: i64,
    pub used_at: DateTime<Utc>,
}

/// Issues and redeems credit tokens
#[derive(Clone)]
pub struct TokenService {
    tokens: Arc<dyn TokenStore>,
    ledger: CreditLedger,
}

/// Generates a token code (32 lowercase hex chars)
pub fn generate_token_code() -> String {
    let mut bytes = [0u8; TOKEN_CODE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl TokenService {
    pub fn new(tokens: Arc<dyn TokenStore>, ledger: CreditLedger) -> Self {
        Self { tokens, ledger }
    }

    /// Issues a token worth `credits`, valid for 30 days
    pub async fn generate(
        &self,
        credits: i64,
        description: Option<String>,
        created_by: &str,
    ) -> Result<CreditToken, TokenError> {
        if credits < 1 {
            return Err(TokenError::InvalidCredits(credits));
        }

        let token = self
            .tokens
            .create(CreateCreditToken {
                code: generate_token_code(),
                credits,
                description,
                created_by: created_by.to_string(),
                expires_at: Utc::now() + Duration::days(TOKEN_VALIDITY_DAYS),
            })
            .await?;

        info!(token_id = %token.id, credits, created_by = %created_by, "Generated credit token");
        Ok(token)
    }

    /// Redeems a token into `user_id`'s balance
    ///
    /// # Errors
    ///
    /// `NotFound`, `AlreadyUsed` or `Expired` before any balance change.
    pub async fn redeem(&self, code: &str, user_id: &str) -> Result<Redemption, TokenError> {
        let token = self.tokens.get_by_code(code).await?.ok_or(TokenError::NotFound)?;

        if token.is_used {
            return Err(TokenError::AlreadyUsed);
        }
        if token.is_expired() {
            return Err(TokenError::Expired);
        }

        // Loses to a concurrent redemption between the read and here
        let token = self
            .tokens
            .mark_used(code, user_id)
            .await?
            .ok_or(TokenError::AlreadyUsed)?;

        let remaining_credits = match self.ledger.credit(user_id, token.credits).await {
            Ok(balance) => balance,
            Err(e) => {
                error!(
                    token_id = %token.id,
                    user_id = %user_id,
                    error = %e,
                    "Token marked used but crediting failed"
                );
                return Err(e.into());
            }
        };

        info!(token_id = %token.id, user_id = %user_id, credits = token.credits, "Redeemed credit token");

        Ok(Redemption {
            credits: token.credits,
            remaining_credits,
            used_at: token.used_at.unwrap_or_else(Utc::now),
            token,
        })
    }

    pub async fn list(&self, filter: TokenFilter) -> Result<Vec<CreditToken>, TokenError> {
        Ok(self.tokens.list(filter).await?)
    }

    /// Deletes an unused token issued by `requested_by`
    pub async fn delete(&self, id: Uuid, requested_by: &str) -> Result<(), TokenError> {
        let token = self.tokens.get_by_id(id).await?.ok_or(TokenError::NotFound)?;

        if token.created_by != requested_by {
            return Err(TokenError::NotCreator);
        }
        if token.is_used {
            return Err(TokenError::UsedTokenNotDeletable);
        }

        if !self.tokens.delete(id).await? {
            // Redeemed between the read and the delete
            return Err(TokenError::UsedTokenNotDeletable);
        }

        info!(token_id = %id, "Deleted credit token");
        Ok(())
    }
}
