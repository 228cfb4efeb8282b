//! tidepay: a transaction and settlement ledger for multi-tenant payment
//! collection.
//!
//! The ledger is the system of record for charges, refunds, ACH
//! settlement, fund allocations, and customer balance accumulators, with
//! a pluggable processor gateway at the boundary.

pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod events;
pub mod ledger;
pub mod processor;

pub use config::Config;
pub use error::AppError;
