//! Loyalty points ledger.
//!
//! Points are granted to user keys as expiring coupons under a global supply
//! cap. A single owner (changed through a propose/confirm handshake, and
//! protected by a blacklist) allocates, redeems and corrects points.
//!
//! * [`coupons`] — coupon records and the per-user index.
//! * [`supply`] — the capped running total.
//! * [`access`] — ownership state machine and blacklist.
//! * [`ledger`] — the engine tying the three together, plus snapshots.
//! * [`shared`] — a lock-guarded, optionally persisted handle for hosts.
//! * [`store`] — on-disk snapshot and event journal.

pub mod access;
pub mod config;
pub mod context;
pub mod coupons;
pub mod ledger;
pub mod shared;
pub mod store;
pub mod supply;
pub mod types;

mod error;

pub use context::{CallContext, Invocation};
pub use error::{LedgerError, Result};
pub use ledger::{LedgerEvent, LoyaltyLedger, Receipt};
pub use shared::SharedLedger;
