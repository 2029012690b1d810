use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    config::LedgerConfig,
    context::CallContext,
    coupons::Coupon,
    error::LedgerError,
    ledger::{LedgerEvent, LedgerSnapshot, LoyaltyLedger, Receipt},
    store::{LedgerStore, StoreError},
    types::{CouponId, Points, Principal, Timestamp},
};

#[derive(Debug, Error)]
pub enum CommitError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, CommitError>;

/// Host-side wrapper that serializes every mutation behind one write lock.
///
/// A mutation runs against a staged copy of the ledger. The copy replaces the
/// live state only after it has been persisted, so a failed operation or a
/// failed write leaves nothing behind.
pub struct SharedLedger {
    state: RwLock<LoyaltyLedger>,
    journal: Mutex<Vec<LedgerEvent>>,
    store: Option<LedgerStore>,
}

impl SharedLedger {
    /// Purely in-memory ledger.
    pub fn in_memory(ledger: LoyaltyLedger) -> Self {
        Self {
            state: RwLock::new(ledger),
            journal: Mutex::new(Vec::new()),
            store: None,
        }
    }

    /// Opens the ledger persisted under `config.state_dir`, or creates a fresh
    /// one owned by `config.owner` if none exists yet.
    pub fn bootstrap(config: &LedgerConfig) -> Result<Self> {
        let store = LedgerStore::new(&config.state_dir);
        let ledger = if store.exists() {
            store.load()?
        } else {
            let ledger = LoyaltyLedger::new(config.owner.clone(), config.max_supply);
            store.save(&ledger)?;
            info!(
                owner = %config.owner,
                max_supply = config.max_supply,
                state_dir = %config.state_dir.display(),
                "ledger initialized"
            );
            ledger
        };
        Ok(Self {
            state: RwLock::new(ledger),
            journal: Mutex::new(Vec::new()),
            store: Some(store),
        })
    }

    pub fn allocate(
        &self,
        ctx: &impl CallContext,
        user_key: &str,
        amount: Points,
        expiry: Timestamp,
        reference_tag: &str,
    ) -> Result<Receipt<CouponId>> {
        self.commit("allocate", ctx, |ledger| {
            ledger.allocate(ctx, user_key, amount, expiry, reference_tag)
        })
    }

    pub fn balance_of(&self, ctx: &impl CallContext, user_key: &str) -> Result<Receipt<Points>> {
        let state = self.state.read();
        let receipt = state
            .balance_of(ctx, user_key)
            .map_err(|err| rejected("balance_of", ctx, err))?;
        self.publish("balance_of", &receipt.events);
        Ok(receipt)
    }

    pub fn modify(
        &self,
        ctx: &impl CallContext,
        coupon_id: CouponId,
        new_amount: Points,
    ) -> Result<Receipt<()>> {
        self.commit("modify", ctx, |ledger| ledger.modify(ctx, coupon_id, new_amount))
    }

    pub fn redeem(
        &self,
        ctx: &impl CallContext,
        user_key: &str,
        amount: Points,
    ) -> Result<Receipt<Points>> {
        self.commit("redeem", ctx, |ledger| ledger.redeem(ctx, user_key, amount))
    }

    pub fn propose_owner(&self, ctx: &impl CallContext, candidate: &str) -> Result<Receipt<()>> {
        self.commit("propose_owner", ctx, |ledger| {
            ledger.propose_owner(ctx, candidate)
        })
    }

    pub fn confirm_owner(&self, ctx: &impl CallContext) -> Result<Receipt<()>> {
        self.commit("confirm_owner", ctx, |ledger| ledger.confirm_owner(ctx))
    }

    pub fn cancel_transfer(&self, ctx: &impl CallContext) -> Result<Receipt<()>> {
        self.commit("cancel_transfer", ctx, |ledger| ledger.cancel_transfer(ctx))
    }

    pub fn blacklist(&self, ctx: &impl CallContext, target: &str) -> Result<Receipt<()>> {
        self.commit("blacklist", ctx, |ledger| ledger.blacklist(ctx, target))
    }

    pub fn coupon(&self, id: CouponId) -> std::result::Result<Coupon, LedgerError> {
        self.state.read().coupon(id).cloned()
    }

    pub fn total_supply(&self) -> Points {
        self.state.read().total_supply()
    }

    pub fn max_supply(&self) -> Points {
        self.state.read().max_supply()
    }

    pub fn owner(&self) -> Principal {
        self.state.read().access().owner().clone()
    }

    pub fn pending_owner(&self) -> Option<Principal> {
        self.state.read().access().pending_owner().cloned()
    }

    pub fn is_blacklisted(&self, principal: &str) -> bool {
        self.state.read().access().is_blacklisted(principal)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.state.read().snapshot()
    }

    /// Events published by this handle since it was opened.
    pub fn events(&self) -> Vec<LedgerEvent> {
        self.journal.lock().clone()
    }

    fn commit<T>(
        &self,
        op: &'static str,
        ctx: &impl CallContext,
        apply: impl FnOnce(&mut LoyaltyLedger) -> std::result::Result<Receipt<T>, LedgerError>,
    ) -> Result<Receipt<T>> {
        let mut state = self.state.write();
        let mut staged = state.clone();
        let receipt = apply(&mut staged).map_err(|err| rejected(op, ctx, err))?;
        debug_assert!(staged.check_invariants().is_ok());
        if let Some(store) = &self.store {
            store.save(&staged)?;
        }
        *state = staged;
        // Still under the write lock so the journal follows commit order.
        self.publish(op, &receipt.events);
        Ok(receipt)
    }

    /// The snapshot is the source of truth. Once it is written the operation
    /// has happened, so a journal failure is logged rather than returned.
    fn publish(&self, op: &str, events: &[LedgerEvent]) {
        for event in events {
            log_event(event);
        }
        if let Some(store) = &self.store {
            if let Err(err) = store.append_events(events) {
                warn!(op, error = %err, "event journal append failed");
            }
        }
        self.journal.lock().extend_from_slice(events);
    }
}

fn rejected(op: &str, ctx: &impl CallContext, err: LedgerError) -> CommitError {
    warn!(op, caller = ctx.caller(), error = %err, "operation rejected");
    CommitError::Ledger(err)
}

fn log_event(event: &LedgerEvent) {
    match event {
        LedgerEvent::PointsAllocated {
            coupon_id,
            user_key,
            points,
            total_supply,
        } => info!(coupon_id, user_key = %user_key, points, total_supply, "points allocated"),
        LedgerEvent::BalanceReported { user_key, points } => {
            info!(user_key = %user_key, points, "balance reported")
        }
        LedgerEvent::CouponModified {
            coupon_id,
            points,
            total_supply,
        } => info!(coupon_id, points, total_supply, "coupon modified"),
        LedgerEvent::PointsRedeemed {
            coupon_id,
            user_key,
            points,
            total_supply,
        } => info!(coupon_id, user_key = %user_key, points, total_supply, "points redeemed"),
        LedgerEvent::PointsBurned {
            coupon_id,
            user_key,
            points,
            total_supply,
        } => info!(coupon_id, user_key = %user_key, points, total_supply, "expired points burned"),
        LedgerEvent::OwnershipProposed { owner, candidate } => {
            info!(owner = %owner, candidate = %candidate, "ownership transfer proposed")
        }
        LedgerEvent::OwnershipTransferred { previous, owner } => {
            info!(previous = %previous, owner = %owner, "ownership transferred")
        }
        LedgerEvent::OwnershipTransferCancelled { owner, candidate } => {
            info!(owner = %owner, candidate = %candidate, "ownership transfer cancelled")
        }
        LedgerEvent::PrincipalBlacklisted { principal } => {
            info!(principal = %principal, "principal blacklisted")
        }
    }
}
