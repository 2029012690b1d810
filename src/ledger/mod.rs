use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::access::AccessController;
use crate::context::CallContext;
use crate::coupons::{Coupon, CouponStore};
use crate::error::Result;
use crate::supply::SupplyAccountant;
use crate::types::{CouponId, Points, Principal, Timestamp, UserKey};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    /// Number of committed mutating operations.
    pub height: u64,
    /// Time of the last committed operation.
    pub timestamp: Timestamp,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    pub access: AccessController,
    pub supply: SupplyAccountant,
    pub coupons: Vec<Coupon>,
    #[serde(with = "crate::ledger::serde_root")]
    pub merkle_root: [u8; 32],
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    PointsAllocated {
        coupon_id: CouponId,
        user_key: UserKey,
        points: Points,
        total_supply: Points,
    },
    BalanceReported {
        user_key: UserKey,
        points: Points,
    },
    CouponModified {
        coupon_id: CouponId,
        points: Points,
        total_supply: Points,
    },
    PointsRedeemed {
        coupon_id: CouponId,
        user_key: UserKey,
        points: Points,
        total_supply: Points,
    },
    PointsBurned {
        coupon_id: CouponId,
        user_key: UserKey,
        points: Points,
        total_supply: Points,
    },
    OwnershipProposed {
        owner: Principal,
        candidate: Principal,
    },
    OwnershipTransferred {
        previous: Principal,
        owner: Principal,
    },
    OwnershipTransferCancelled {
        owner: Principal,
        candidate: Principal,
    },
    PrincipalBlacklisted {
        principal: Principal,
    },
}

/// Value produced by an operation together with the events it emitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt<T> {
    pub value: T,
    pub events: Vec<LedgerEvent>,
}

impl<T> Receipt<T> {
    fn new(value: T, events: Vec<LedgerEvent>) -> Self {
        Self { value, events }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("total supply {total} above cap {max}")]
    SupplyAboveCap { total: Points, max: Points },
    #[error("coupon {coupon_id} has {remaining} remaining of {granted} granted")]
    RemainingAboveGrant {
        coupon_id: CouponId,
        remaining: Points,
        granted: Points,
    },
    #[error("total supply {recorded} does not match coupon sum {computed}")]
    SupplyMismatch { recorded: Points, computed: u128 },
    #[error("owner {owner} is blacklisted")]
    OwnerBlacklisted { owner: Principal },
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("merkle root mismatch: recorded {recorded}, computed {computed}")]
    RootMismatch { recorded: String, computed: String },
    #[error("invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
}

/// The ledger engine. Every public operation checks the access gate first
/// and either applies completely or returns an error with no changes made.
#[derive(Clone, Debug)]
pub struct LoyaltyLedger {
    meta: SnapshotMetadata,
    access: AccessController,
    supply: SupplyAccountant,
    coupons: CouponStore,
}

impl LoyaltyLedger {
    pub fn new(owner: impl Into<Principal>, max_supply: Points) -> Self {
        Self {
            meta: SnapshotMetadata::default(),
            access: AccessController::new(owner),
            supply: SupplyAccountant::new(max_supply),
            coupons: CouponStore::new(),
        }
    }

    pub fn meta(&self) -> &SnapshotMetadata {
        &self.meta
    }

    pub fn access(&self) -> &AccessController {
        &self.access
    }

    pub fn total_supply(&self) -> Points {
        self.supply.total_supply()
    }

    pub fn max_supply(&self) -> Points {
        self.supply.max_supply()
    }

    /// Public getter, no access gate.
    pub fn coupon(&self, id: CouponId) -> Result<&Coupon> {
        self.coupons.get(id)
    }

    pub fn coupons(&self) -> impl Iterator<Item = &Coupon> {
        self.coupons.iter()
    }

    pub fn coupons_for(&self, user_key: &str) -> &[CouponId] {
        self.coupons.coupons_for(user_key)
    }

    pub fn allocate(
        &mut self,
        ctx: &impl CallContext,
        user_key: &str,
        amount: Points,
        expiry: Timestamp,
        reference_tag: &str,
    ) -> Result<Receipt<CouponId>> {
        self.access.ensure_authorized(ctx.caller())?;
        let now = self.effective_now(ctx);
        let total_supply = self.supply.try_increase(amount)?;
        let coupon_id = self.coupons.create(user_key, amount, expiry, reference_tag);
        self.commit(now);
        Ok(Receipt::new(
            coupon_id,
            vec![LedgerEvent::PointsAllocated {
                coupon_id,
                user_key: user_key.to_string(),
                points: amount,
                total_supply,
            }],
        ))
    }

    /// Sums the live coupons of `user_key`. Expired coupons read as zero and
    /// are left untouched.
    pub fn balance_of(&self, ctx: &impl CallContext, user_key: &str) -> Result<Receipt<Points>> {
        self.access.ensure_authorized(ctx.caller())?;
        let now = self.effective_now(ctx);
        let mut points: Points = 0;
        for id in self.coupons.coupons_for(user_key) {
            points += self.coupons.get(*id)?.live_points(now);
        }
        Ok(Receipt::new(
            points,
            vec![LedgerEvent::BalanceReported {
                user_key: user_key.to_string(),
                points,
            }],
        ))
    }

    /// Overwrites a coupon's grant and remaining amount. The difference is
    /// booked against total supply, so growth is capped like an allocation.
    pub fn modify(
        &mut self,
        ctx: &impl CallContext,
        coupon_id: CouponId,
        new_amount: Points,
    ) -> Result<Receipt<()>> {
        self.access.ensure_authorized(ctx.caller())?;
        let now = self.effective_now(ctx);
        let previous = self.coupons.get(coupon_id)?.remaining_amount;
        let total_supply = if new_amount >= previous {
            self.supply.try_increase(new_amount - previous)?
        } else {
            self.supply.decrease(previous - new_amount)
        };
        self.coupons.regrant(coupon_id, new_amount)?;
        self.commit(now);
        Ok(Receipt::new(
            (),
            vec![LedgerEvent::CouponModified {
                coupon_id,
                points: new_amount,
                total_supply,
            }],
        ))
    }

    /// Consumes up to `amount` points from the user's coupons, soonest expiry
    /// first. Expired coupons met along the way are burned without credit.
    /// Returns the credited total, which may be less than `amount`.
    pub fn redeem(
        &mut self,
        ctx: &impl CallContext,
        user_key: &str,
        amount: Points,
    ) -> Result<Receipt<Points>> {
        self.access.ensure_authorized(ctx.caller())?;
        let now = self.effective_now(ctx);
        let order = self.redemption_order(user_key)?;

        let mut needed = amount;
        let mut redeemed: Points = 0;
        let mut events = Vec::new();
        for coupon_id in order {
            if needed == 0 {
                break;
            }
            let coupon = self.coupons.get(coupon_id)?;
            let remaining = coupon.remaining_amount;
            if remaining == 0 {
                continue;
            }
            if coupon.is_expired(now) {
                self.coupons.set_remaining(coupon_id, 0)?;
                let total_supply = self.supply.decrease(remaining);
                events.push(LedgerEvent::PointsBurned {
                    coupon_id,
                    user_key: user_key.to_string(),
                    points: remaining,
                    total_supply,
                });
                continue;
            }
            let taken = remaining.min(needed);
            self.coupons.set_remaining(coupon_id, remaining - taken)?;
            let total_supply = self.supply.decrease(taken);
            needed -= taken;
            redeemed += taken;
            events.push(LedgerEvent::PointsRedeemed {
                coupon_id,
                user_key: user_key.to_string(),
                points: taken,
                total_supply,
            });
        }

        self.commit(now);
        Ok(Receipt::new(redeemed, events))
    }

    pub fn propose_owner(&mut self, ctx: &impl CallContext, candidate: &str) -> Result<Receipt<()>> {
        let now = self.effective_now(ctx);
        self.access.propose(ctx.caller(), candidate)?;
        self.commit(now);
        Ok(Receipt::new(
            (),
            vec![LedgerEvent::OwnershipProposed {
                owner: self.access.owner().clone(),
                candidate: candidate.to_string(),
            }],
        ))
    }

    pub fn confirm_owner(&mut self, ctx: &impl CallContext) -> Result<Receipt<()>> {
        let now = self.effective_now(ctx);
        let previous = self.access.confirm(ctx.caller())?;
        self.commit(now);
        Ok(Receipt::new(
            (),
            vec![LedgerEvent::OwnershipTransferred {
                previous,
                owner: self.access.owner().clone(),
            }],
        ))
    }

    pub fn cancel_transfer(&mut self, ctx: &impl CallContext) -> Result<Receipt<()>> {
        let now = self.effective_now(ctx);
        let candidate = self.access.cancel(ctx.caller())?;
        self.commit(now);
        Ok(Receipt::new(
            (),
            vec![LedgerEvent::OwnershipTransferCancelled {
                owner: self.access.owner().clone(),
                candidate,
            }],
        ))
    }

    pub fn blacklist(&mut self, ctx: &impl CallContext, target: &str) -> Result<Receipt<()>> {
        let now = self.effective_now(ctx);
        self.access.blacklist(ctx.caller(), target)?;
        self.commit(now);
        Ok(Receipt::new(
            (),
            vec![LedgerEvent::PrincipalBlacklisted {
                principal: target.to_string(),
            }],
        ))
    }

    pub fn check_invariants(&self) -> std::result::Result<(), InvariantViolation> {
        let total = self.supply.total_supply();
        let max = self.supply.max_supply();
        if total > max {
            return Err(InvariantViolation::SupplyAboveCap { total, max });
        }
        if let Some(coupon) = self
            .coupons
            .iter()
            .find(|c| c.remaining_amount > c.granted_amount)
        {
            return Err(InvariantViolation::RemainingAboveGrant {
                coupon_id: coupon.id,
                remaining: coupon.remaining_amount,
                granted: coupon.granted_amount,
            });
        }
        let computed = self.coupons.total_remaining();
        if computed != total as u128 {
            return Err(InvariantViolation::SupplyMismatch {
                recorded: total,
                computed,
            });
        }
        let owner = self.access.owner();
        if self.access.is_blacklisted(owner) {
            return Err(InvariantViolation::OwnerBlacklisted {
                owner: owner.clone(),
            });
        }
        Ok(())
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            meta: self.meta.clone(),
            access: self.access.clone(),
            supply: self.supply.clone(),
            coupons: self.coupons.iter().cloned().collect(),
            merkle_root: self.merkle_root(),
        }
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> std::result::Result<Self, SnapshotError> {
        let recorded = snapshot.merkle_root;
        let ledger = Self {
            meta: snapshot.meta,
            access: snapshot.access,
            supply: snapshot.supply,
            coupons: CouponStore::from_coupons(snapshot.coupons),
        };
        let computed = ledger.merkle_root();
        if computed != recorded {
            return Err(SnapshotError::RootMismatch {
                recorded: hex::encode(recorded),
                computed: hex::encode(computed),
            });
        }
        ledger.check_invariants()?;
        Ok(ledger)
    }

    pub fn merkle_root(&self) -> [u8; 32] {
        compute_merkle_root(&self.access, &self.supply, &self.coupons)
    }

    fn redemption_order(&self, user_key: &str) -> Result<Vec<CouponId>> {
        let mut keyed = Vec::new();
        for id in self.coupons.coupons_for(user_key) {
            keyed.push((self.coupons.get(*id)?.expiry, *id));
        }
        keyed.sort_unstable();
        Ok(keyed.into_iter().map(|(_, id)| id).collect())
    }

    /// Time never runs backwards relative to the last commit.
    fn effective_now(&self, ctx: &impl CallContext) -> Timestamp {
        ctx.now().max(self.meta.timestamp)
    }

    fn commit(&mut self, now: Timestamp) {
        self.meta.height += 1;
        self.meta.timestamp = now;
    }
}

/// Length-prefixed so adjacent fields can never shift bytes between them.
fn update_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn compute_merkle_root(
    access: &AccessController,
    supply: &SupplyAccountant,
    coupons: &CouponStore,
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();

    let mut hasher = Sha256::new();
    hasher.update(b"supply");
    hasher.update(supply.max_supply().to_le_bytes());
    hasher.update(supply.total_supply().to_le_bytes());
    leaves.push(hasher.finalize().into());

    let mut hasher = Sha256::new();
    hasher.update(b"owner");
    update_str(&mut hasher, access.owner());
    if let Some(candidate) = access.pending_owner() {
        hasher.update(b"pending");
        update_str(&mut hasher, candidate);
    }
    leaves.push(hasher.finalize().into());

    for principal in access.blacklisted() {
        let mut hasher = Sha256::new();
        hasher.update(b"blacklist");
        update_str(&mut hasher, principal);
        leaves.push(hasher.finalize().into());
    }

    for coupon in coupons.iter() {
        let mut hasher = Sha256::new();
        hasher.update(b"coupon");
        hasher.update(coupon.id.to_le_bytes());
        update_str(&mut hasher, &coupon.owner_key);
        hasher.update(coupon.granted_amount.to_le_bytes());
        hasher.update(coupon.remaining_amount.to_le_bytes());
        hasher.update(coupon.expiry.to_le_bytes());
        update_str(&mut hasher, &coupon.reference_tag);
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"loyalty-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

pub(crate) mod serde_root {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        <[u8; 32]>::try_from(bytes.as_slice()).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests;
