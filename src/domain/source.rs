//! Tokenized funding instruments.
//!
//! Raw card and bank numbers never touch this system; the processor holds
//! the instrument and we keep a token plus display metadata.

use crate::domain::transaction::Rail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A reusable, tokenized reference to a customer's card or bank account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSource {
    pub id: i64,
    pub customer_id: i64,
    pub organization_id: i64,
    /// Processor-side wallet/token id used for token sales.
    pub processor_token: String,
    pub rail: Rail,
    pub last_four: String,
    pub holder_name: String,
    /// Soft-delete flag; inactive sources cannot be charged.
    pub is_active: bool,
    /// Exactly one default per customer at any time.
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}
