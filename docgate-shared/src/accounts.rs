/// Account registration and auto-provisioning
///
/// New accounts are inserted with their starting balance in a single
/// statement, so creation and the initial grant succeed or fail together and
/// no caller ever observes a freshly created, still unfunded account.
///
/// Concurrent first requests for the same email race on the unique insert;
/// the loser re-reads the winner's row, so exactly one account results.

use std::sync::Arc;
use tracing::info;

use crate::auth::middleware::Identity;
use crate::models::account::{Account, CreateAccount};
use crate::store::{AccountStore, StoreError};

/// Default starting grant for new accounts
pub const DEFAULT_STARTING_CREDITS: i64 = 10;

/// Error type for account operations
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    /// Registration for a taken user id or email
    #[error("Account already exists: {0}")]
    AlreadyExists(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Creates and resolves accounts
#[derive(Clone)]
pub struct AccountService {
    accounts: Arc<dyn AccountStore>,
    starting_balance: i64,
}

impl AccountService {
    pub fn new(accounts: Arc<dyn AccountStore>, starting_balance: i64) -> Self {
        Self {
            accounts,
            starting_balance: starting_balance.max(0),
        }
    }

    /// Explicit registration
    ///
    /// # Errors
    ///
    /// `AlreadyExists` when the user id or email is taken
    pub async fn register(&self, user_id: &str, email: &str) -> Result<Account, AccountError> {
        match self.provision(user_id, email).await {
            Err(AccountError::Store(StoreError::Conflict(_))) => {
                Err(AccountError::AlreadyExists(user_id.to_string()))
            }
            other => other,
        }
    }

    /// Looks up the caller's account without creating one
    ///
    /// Opaque-key identities are matched by account id first, everything
    /// else by email.
    pub async fn find_account(&self, identity: &Identity) -> Result<Option<Account>, AccountError> {
        if let Some(account_id) = identity.account_id.as_deref() {
            if let Some(account) = self.accounts.get(account_id).await? {
                return Ok(Some(account));
            }
        }

        Ok(self.accounts.get_by_email(&identity.email).await?)
    }

    /// Returns the caller's account, creating it on first contact
    ///
    /// Signed-token identities are provisioned with `user_id = email`.
    pub async fn ensure_account(&self, identity: &Identity) -> Result<Account, AccountError> {
        if let Some(account) = self.find_account(identity).await? {
            return Ok(account);
        }

        let user_id = identity.account_id.as_deref().unwrap_or(identity.email.as_str());

        match self.provision(user_id, &identity.email).await {
            Ok(account) => {
                info!(
                    user_id = %account.user_id,
                    email = %account.email,
                    balance = account.balance,
                    "Auto-provisioned account"
                );
                Ok(account)
            }
            Err(AccountError::Store(StoreError::Conflict(_))) => {
                // Lost the insert race: use the winner's account
                let winner = match self.accounts.get_by_email(&identity.email).await? {
                    Some(account) => Some(account),
                    None => self.accounts.get(user_id).await?,
                };
                winner.ok_or_else(|| {
                    AccountError::Store(StoreError::Internal(format!(
                        "account {} conflicted but could not be read back",
                        user_id
                    )))
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn provision(&self, user_id: &str, email: &str) -> Result<Account, AccountError> {
        let account = self
            .accounts
            .create(CreateAccount {
                user_id: user_id.to_string(),
                email: email.to_string(),
                balance: self.starting_balance,
            })
            .await?;

        Ok(account)
    }
}
