//! Ledger orchestration: the only writers of transaction state.

pub mod subscriptions;
pub mod writer;

pub use subscriptions::{NewSubscriptionRequest, SubscriptionOutcome, SubscriptionService};
pub use writer::{AchOutcome, ChargeRequest, LedgerWriter};
