use thiserror::Error;

use crate::types::{CouponId, Points, Principal};

/// Canonical error type returned by every ledger operation.
///
/// Each variant is a deterministic outcome of the caller's arguments or the
/// current state. None of them leave partial changes behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Caller failed the access gate.
    #[error("principal {principal} is not authorized")]
    NotAuthorized { principal: Principal },

    /// Coupon id was never issued.
    #[error("unknown coupon {coupon_id}")]
    NotFound { coupon_id: CouponId },

    /// Quantity does not fit the coupon it targets.
    #[error("invalid amount {amount}: coupon {coupon_id} was granted {granted}")]
    InvalidAmount {
        coupon_id: CouponId,
        amount: Points,
        granted: Points,
    },

    /// Allocation would push total supply past the cap.
    #[error("supply exceeded: {total} + {requested} > max {max}")]
    SupplyExceeded {
        requested: Points,
        total: Points,
        max: Points,
    },

    /// An ownership proposal is already outstanding.
    #[error("ownership transfer to {candidate} already pending")]
    TransferInProgress { candidate: Principal },

    /// The current owner can never be blacklisted.
    #[error("owner {owner} cannot be blacklisted")]
    CannotBlacklistOwner { owner: Principal },

    /// Cancellation requested with no proposal outstanding.
    #[error("no ownership transfer pending")]
    NoTransferPending,
}

pub type Result<T> = std::result::Result<T, LedgerError>;
