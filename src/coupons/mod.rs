use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::types::{CouponId, Points, Timestamp, UserKey};

pub const FIRST_COUPON_ID: CouponId = 1;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Coupon {
    pub id: CouponId,
    pub owner_key: UserKey,
    pub granted_amount: Points,
    pub remaining_amount: Points,
    pub expiry: Timestamp,
    pub reference_tag: String,
}

impl Coupon {
    /// A coupon is live strictly before its expiry timestamp.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expiry <= now
    }

    pub fn live_points(&self, now: Timestamp) -> Points {
        if self.is_expired(now) {
            0
        } else {
            self.remaining_amount
        }
    }
}

/// Owns every coupon ever issued plus the per-user index.
///
/// Coupons are never removed. A fully consumed or burned coupon stays in the
/// store with `remaining_amount == 0`.
#[derive(Clone, Debug)]
pub struct CouponStore {
    coupons: BTreeMap<CouponId, Coupon>,
    by_user: BTreeMap<UserKey, Vec<CouponId>>,
    next_id: CouponId,
}

impl Default for CouponStore {
    fn default() -> Self {
        Self {
            coupons: BTreeMap::new(),
            by_user: BTreeMap::new(),
            next_id: FIRST_COUPON_ID,
        }
    }
}

impl CouponStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from persisted coupons. The user index is derived
    /// from id order, which is allocation order.
    pub fn from_coupons(coupons: Vec<Coupon>) -> Self {
        let mut store = Self::new();
        for coupon in coupons {
            store.next_id = store.next_id.max(coupon.id + 1);
            store.coupons.insert(coupon.id, coupon);
        }
        for coupon in store.coupons.values() {
            store
                .by_user
                .entry(coupon.owner_key.clone())
                .or_default()
                .push(coupon.id);
        }
        store
    }

    pub fn create(
        &mut self,
        owner_key: &str,
        amount: Points,
        expiry: Timestamp,
        reference_tag: &str,
    ) -> CouponId {
        let id = self.next_id;
        self.next_id += 1;
        self.coupons.insert(
            id,
            Coupon {
                id,
                owner_key: owner_key.to_string(),
                granted_amount: amount,
                remaining_amount: amount,
                expiry,
                reference_tag: reference_tag.to_string(),
            },
        );
        self.by_user.entry(owner_key.to_string()).or_default().push(id);
        id
    }

    pub fn get(&self, id: CouponId) -> Result<&Coupon> {
        self.coupons
            .get(&id)
            .ok_or(LedgerError::NotFound { coupon_id: id })
    }

    /// Lowers (or restores up to the grant) the remaining amount and returns
    /// the previous value.
    pub fn set_remaining(&mut self, id: CouponId, new_remaining: Points) -> Result<Points> {
        let coupon = self
            .coupons
            .get_mut(&id)
            .ok_or(LedgerError::NotFound { coupon_id: id })?;
        if new_remaining > coupon.granted_amount {
            return Err(LedgerError::InvalidAmount {
                coupon_id: id,
                amount: new_remaining,
                granted: coupon.granted_amount,
            });
        }
        let previous = coupon.remaining_amount;
        coupon.remaining_amount = new_remaining;
        Ok(previous)
    }

    /// Overwrites both grant and remaining amount. Returns the previous
    /// remaining amount.
    pub fn regrant(&mut self, id: CouponId, amount: Points) -> Result<Points> {
        let coupon = self
            .coupons
            .get_mut(&id)
            .ok_or(LedgerError::NotFound { coupon_id: id })?;
        let previous = coupon.remaining_amount;
        coupon.granted_amount = amount;
        coupon.remaining_amount = amount;
        Ok(previous)
    }

    pub fn coupons_for(&self, user_key: &str) -> &[CouponId] {
        self.by_user
            .get(user_key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Coupon> {
        self.coupons.values()
    }

    pub fn total_remaining(&self) -> u128 {
        self.coupons
            .values()
            .map(|c| c.remaining_amount as u128)
            .sum()
    }
}
