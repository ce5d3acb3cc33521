/// Credit ledger
///
/// Owns every balance movement. Debits are a single conditional update
/// against the store, so concurrent debits against the same account can never
/// overdraw it: of N debits of `a` against balance `B`, exactly `floor(B/a)`
/// succeed.
///
/// # Example
///
/// ```
/// use docgate_shared::ledger::{CreditLedger, LedgerError};
/// use docgate_shared::models::account::CreateAccount;
/// use docgate_shared::store::Stores;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let stores = Stores::in_memory();
/// stores.accounts.create(CreateAccount {
///     user_id: "alice".to_string(),
///     email: "alice@example.com".to_string(),
///     balance: 3,
/// }).await?;
///
/// let ledger = CreditLedger::new(stores.accounts.clone());
/// assert_eq!(ledger.debit("alice", 2).await?, 1);
/// assert!(matches!(
///     ledger.debit("alice", 2).await,
///     Err(LedgerError::InsufficientCredits { required: 2, available: 1 })
/// ));
/// # Ok(())
/// # }
/// ```

use std::sync::Arc;
use tracing::{debug, info};

use crate::store::{AccountStore, StoreError};

/// Error type for ledger operations
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Balance operations over an account store
#[derive(Clone)]
pub struct CreditLedger {
    accounts: Arc<dyn AccountStore>,
}

impl CreditLedger {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self { accounts }
    }

    /// Current balance
    pub async fn get_balance(&self, user_id: &str) -> Result<i64, LedgerError> {
        self.accounts
            .get(user_id)
            .await?
            .map(|account| account.balance)
            .ok_or_else(|| LedgerError::AccountNotFound(user_id.to_string()))
    }

    /// Debits `amount` if the balance covers it
    ///
    /// # Returns
    ///
    /// The new balance
    ///
    /// # Errors
    ///
    /// `InsufficientCredits` when `amount > balance`, `AccountNotFound` when
    /// the account is missing, `InvalidAmount` for non-positive amounts.
    pub async fn debit(&self, user_id: &str, amount: i64) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        if let Some(balance) = self.accounts.debit_if_sufficient(user_id, amount).await? {
            debug!(user_id = %user_id, amount, balance, "Debited credits");
            return Ok(balance);
        }

        // The conditional update matched nothing: tell the two causes apart
        match self.accounts.get(user_id).await? {
            Some(account) => Err(LedgerError::InsufficientCredits {
                required: amount,
                available: account.balance,
            }),
            None => Err(LedgerError::AccountNotFound(user_id.to_string())),
        }
    }

    /// Adds `amount` to the balance
    pub async fn credit(&self, user_id: &str, amount: i64) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let balance = self
            .accounts
            .credit(user_id, amount)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(user_id.to_string()))?;

        info!(user_id = %user_id, amount, balance, "Credited credits");
        Ok(balance)
    }
}

/// What came back from the upstream call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamOutcome {
    /// No structured response (transport error, timeout, cancellation or a
    /// failure before the call)
    NoResponse,

    /// Structured response with `success = true`
    Succeeded,

    /// Structured response with `success = false`
    SemanticFailure,
}

/// Charging rule for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementPolicy {
    /// Credits per call
    pub cost: i64,

    /// Charge even when the upstream reports a semantic failure
    pub charge_on_upstream_response: bool,
}

impl SettlementPolicy {
    pub const fn new(cost: i64, charge_on_upstream_response: bool) -> Self {
        Self {
            cost,
            charge_on_upstream_response,
        }
    }

    /// Credits owed for an outcome
    pub fn amount_due(&self, outcome: UpstreamOutcome) -> i64 {
        match outcome {
            UpstreamOutcome::Succeeded => self.cost,
            UpstreamOutcome::SemanticFailure if self.charge_on_upstream_response => self.cost,
            _ => 0,
        }
    }
}
