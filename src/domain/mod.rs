//! Domain types for the transaction and settlement ledger.
//!
//! This module provides:
//! - Lossless monetary handling via the Money wrapper
//! - Fee schedules and the fee/net split
//! - Transaction, allocation, subscription, and payment source types
//! - The transaction status state machine

pub mod allocation;
pub mod fees;
pub mod money;
pub mod source;
pub mod subscription;
pub mod transaction;

pub use allocation::{allocation_total, proportional_refund_allocations, FundAllocation};
pub use fees::{proportional_refund_fee, FeeBreakdown, FeeError, FeeSchedule};
pub use money::Money;
pub use source::PaymentSource;
pub use subscription::{Frequency, Subscription, SubscriptionStatus};
pub use transaction::{Rail, Transaction, TransactionKind, TransactionStatus};
