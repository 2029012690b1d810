use rand::{rngs::StdRng, Rng, SeedableRng};

use super::*;
use crate::context::Invocation;
use crate::error::LedgerError;

const OWNER: &str = "0xowner";
const USER: &str = "psd&%#256";
const USER2: &str = "ps215d&%#256";

fn at(now: Timestamp) -> Invocation {
    Invocation::new(OWNER, now)
}

fn ledger(max_supply: Points) -> LoyaltyLedger {
    LoyaltyLedger::new(OWNER, max_supply)
}

#[test]
fn allocation_emits_coupon_id_and_points() {
    let mut ledger = ledger(100);
    let receipt = ledger
        .allocate(&at(1_000), USER, 10, 1_120, "website or something else")
        .unwrap();
    assert_eq!(receipt.value, 1);
    assert_eq!(
        receipt.events,
        vec![LedgerEvent::PointsAllocated {
            coupon_id: 1,
            user_key: USER.into(),
            points: 10,
            total_supply: 10,
        }]
    );
    assert_eq!(ledger.total_supply(), 10);
    assert_eq!(ledger.balance_of(&at(1_000), USER).unwrap().value, 10);
}

#[test]
fn expired_points_read_as_zero_without_mutation() {
    let mut ledger = ledger(100);
    ledger.allocate(&at(1_000), USER, 10, 1_120, "").unwrap();
    let before = ledger.snapshot();
    let receipt = ledger.balance_of(&at(1_121), USER).unwrap();
    assert_eq!(receipt.value, 0);
    assert_eq!(
        receipt.events,
        vec![LedgerEvent::BalanceReported {
            user_key: USER.into(),
            points: 0,
        }]
    );
    assert_eq!(ledger.snapshot(), before);
    assert_eq!(ledger.total_supply(), 10);
}

#[test]
fn unknown_user_has_zero_balance() {
    let ledger = ledger(100);
    assert_eq!(ledger.balance_of(&at(1), "nobody").unwrap().value, 0);
}

#[test]
fn redemption_consumes_soonest_expiry_first() {
    let mut ledger = ledger(100);
    let now = 1_000;
    let first = ledger.allocate(&at(now), USER, 10, now + 60, "").unwrap().value;
    let second = ledger.allocate(&at(now), USER, 10, now + 120, "").unwrap().value;
    ledger.allocate(&at(now), USER, 10, now + 180, "").unwrap();

    let receipt = ledger.redeem(&at(now), USER, 17).unwrap();
    assert_eq!(receipt.value, 17);
    assert_eq!(
        receipt.events[0],
        LedgerEvent::PointsRedeemed {
            coupon_id: first,
            user_key: USER.into(),
            points: 10,
            total_supply: 20,
        }
    );
    assert_eq!(
        receipt.events[1],
        LedgerEvent::PointsRedeemed {
            coupon_id: second,
            user_key: USER.into(),
            points: 7,
            total_supply: 13,
        }
    );
    assert_eq!(ledger.balance_of(&at(now), USER).unwrap().value, 13);
    ledger.check_invariants().unwrap();
}

#[test]
fn redemption_order_ignores_allocation_order() {
    let mut ledger = ledger(100);
    let late = ledger.allocate(&at(0), USER, 10, 500, "").unwrap().value;
    let soon = ledger.allocate(&at(0), USER, 10, 100, "").unwrap().value;
    let receipt = ledger.redeem(&at(0), USER, 4).unwrap();
    assert_eq!(receipt.events.len(), 1);
    assert!(matches!(
        receipt.events[0],
        LedgerEvent::PointsRedeemed { coupon_id, points: 4, .. } if coupon_id == soon
    ));
    assert_eq!(ledger.coupon(late).unwrap().remaining_amount, 10);
}

#[test]
fn equal_expiry_falls_back_to_allocation_order() {
    let mut ledger = ledger(100);
    let a = ledger.allocate(&at(0), USER, 5, 100, "").unwrap().value;
    let b = ledger.allocate(&at(0), USER, 5, 100, "").unwrap().value;
    ledger.redeem(&at(0), USER, 6).unwrap();
    assert_eq!(ledger.coupon(a).unwrap().remaining_amount, 0);
    assert_eq!(ledger.coupon(b).unwrap().remaining_amount, 4);
}

#[test]
fn redeem_burns_expired_coupons_without_credit() {
    let mut ledger = ledger(100);
    ledger.allocate(&at(0), USER2, 10, 30, "").unwrap();
    assert_eq!(ledger.total_supply(), 10);
    assert_eq!(ledger.balance_of(&at(31), USER2).unwrap().value, 0);
    assert_eq!(ledger.total_supply(), 10);

    let receipt = ledger.redeem(&at(31), USER2, 7).unwrap();
    assert_eq!(receipt.value, 0);
    assert_eq!(
        receipt.events,
        vec![LedgerEvent::PointsBurned {
            coupon_id: 1,
            user_key: USER2.into(),
            points: 10,
            total_supply: 0,
        }]
    );
    assert_eq!(ledger.total_supply(), 0);
    assert_eq!(ledger.balance_of(&at(31), USER2).unwrap().value, 0);
    assert_eq!(ledger.coupon(1).unwrap().remaining_amount, 0);
    ledger.check_invariants().unwrap();
}

#[test]
fn burns_expired_then_redeems_live() {
    let mut ledger = ledger(100);
    ledger.allocate(&at(0), USER, 10, 50, "").unwrap();
    ledger.allocate(&at(0), USER, 10, 500, "").unwrap();
    let receipt = ledger.redeem(&at(100), USER, 25).unwrap();
    assert_eq!(receipt.value, 10);
    assert!(matches!(receipt.events[0], LedgerEvent::PointsBurned { points: 10, .. }));
    assert!(matches!(receipt.events[1], LedgerEvent::PointsRedeemed { points: 10, .. }));
    assert_eq!(ledger.total_supply(), 0);
}

#[test]
fn redeem_for_unknown_user_returns_zero() {
    let mut ledger = ledger(100);
    let receipt = ledger.redeem(&at(0), "nobody", 5).unwrap();
    assert_eq!(receipt.value, 0);
    assert!(receipt.events.is_empty());
}

#[test]
fn zero_redemption_touches_nothing() {
    let mut ledger = ledger(100);
    ledger.allocate(&at(0), USER, 10, 5, "").unwrap();
    let receipt = ledger.redeem(&at(10), USER, 0).unwrap();
    assert_eq!(receipt.value, 0);
    assert_eq!(ledger.total_supply(), 10);
}

#[test]
fn cap_is_enforced_without_creating_a_coupon() {
    let mut ledger = ledger(100);
    ledger.allocate(&at(0), USER, 100, 10, "").unwrap();
    let err = ledger.allocate(&at(0), USER, 1, 10, "").unwrap_err();
    assert_eq!(
        err,
        LedgerError::SupplyExceeded {
            requested: 1,
            total: 100,
            max: 100
        }
    );
    assert_eq!(ledger.coupons_for(USER).len(), 1);
    assert_eq!(ledger.meta().height, 1);
}

#[test]
fn modify_overwrites_both_amounts_and_books_the_delta() {
    let mut ledger = ledger(100);
    let id = ledger.allocate(&at(0), USER, 10, 120, "").unwrap().value;
    let receipt = ledger.modify(&at(0), id, 39).unwrap();
    assert_eq!(
        receipt.events,
        vec![LedgerEvent::CouponModified {
            coupon_id: id,
            points: 39,
            total_supply: 39,
        }]
    );
    let coupon = ledger.coupon(id).unwrap();
    assert_eq!(coupon.granted_amount, 39);
    assert_eq!(coupon.remaining_amount, 39);

    ledger.modify(&at(0), id, 5).unwrap();
    assert_eq!(ledger.total_supply(), 5);
    ledger.check_invariants().unwrap();
}

#[test]
fn modify_growth_respects_cap() {
    let mut ledger = ledger(50);
    let id = ledger.allocate(&at(0), USER, 10, 120, "").unwrap().value;
    assert!(matches!(
        ledger.modify(&at(0), id, 51),
        Err(LedgerError::SupplyExceeded { .. })
    ));
    assert_eq!(ledger.coupon(id).unwrap().remaining_amount, 10);
}

#[test]
fn modify_unknown_coupon_is_not_found() {
    let mut ledger = ledger(50);
    assert_eq!(
        ledger.modify(&at(0), 42, 1).unwrap_err(),
        LedgerError::NotFound { coupon_id: 42 }
    );
}

#[test]
fn every_operation_is_gated() {
    let mut ledger = ledger(100);
    let id = ledger.allocate(&at(0), USER, 10, 120, "").unwrap().value;
    let stranger = Invocation::new("stranger", 0);
    let denied = |r: Result<()>| matches!(r, Err(LedgerError::NotAuthorized { .. }));
    assert!(denied(ledger.allocate(&stranger, USER, 1, 1, "").map(|_| ())));
    assert!(denied(ledger.balance_of(&stranger, USER).map(|_| ())));
    assert!(denied(ledger.modify(&stranger, id, 1).map(|_| ())));
    assert!(denied(ledger.redeem(&stranger, USER, 1).map(|_| ())));
    assert!(denied(ledger.propose_owner(&stranger, "stranger").map(|_| ())));
    assert!(denied(ledger.blacklist(&stranger, "x").map(|_| ())));
    assert_eq!(ledger.meta().height, 1);
}

#[test]
fn two_step_transfer_moves_authority() {
    let mut ledger = ledger(100);
    ledger.propose_owner(&at(0), "alice").unwrap();
    assert!(matches!(
        ledger.propose_owner(&at(0), "bob"),
        Err(LedgerError::TransferInProgress { .. })
    ));
    let receipt = ledger.confirm_owner(&Invocation::new("alice", 0)).unwrap();
    assert_eq!(
        receipt.events,
        vec![LedgerEvent::OwnershipTransferred {
            previous: OWNER.into(),
            owner: "alice".into(),
        }]
    );
    let alice = Invocation::new("alice", 0);
    ledger.allocate(&alice, USER, 10, 60, "").unwrap();
    assert!(matches!(
        ledger.balance_of(&at(0), USER),
        Err(LedgerError::NotAuthorized { .. })
    ));
    assert_eq!(ledger.balance_of(&alice, USER).unwrap().value, 10);
}

#[test]
fn blacklisting_rules() {
    let mut ledger = ledger(100);
    assert_eq!(
        ledger.blacklist(&at(0), OWNER).unwrap_err(),
        LedgerError::CannotBlacklistOwner {
            owner: OWNER.into()
        }
    );
    ledger.propose_owner(&at(0), "second").unwrap();
    ledger.blacklist(&at(0), "second").unwrap();
    assert!(matches!(
        ledger.confirm_owner(&Invocation::new("second", 0)),
        Err(LedgerError::NotAuthorized { .. })
    ));
    ledger.cancel_transfer(&at(0)).unwrap();
    assert!(ledger.access().pending_owner().is_none());
    ledger.check_invariants().unwrap();
}

#[test]
fn clock_never_runs_backwards() {
    let mut ledger = ledger(100);
    ledger.allocate(&at(100), USER, 10, 150, "").unwrap();
    assert_eq!(ledger.meta().timestamp, 100);
    ledger.allocate(&at(200), USER, 1, 1_000, "").unwrap();
    // A stale clock still sees the first coupon as expired.
    assert_eq!(ledger.balance_of(&at(120), USER).unwrap().value, 1);
}

#[test]
fn merkle_root_separates_owner_from_pending_candidate() {
    let stable = LoyaltyLedger::new("Xpending", 10);
    let mut pending = LoyaltyLedger::new("X", 10);
    pending.propose_owner(&Invocation::new("X", 0), "").unwrap();
    assert_ne!(stable.merkle_root(), pending.merkle_root());

    let mut tagged = ledger(100);
    tagged.allocate(&at(0), "ab", 5, 50, "c").unwrap();
    let mut shifted = ledger(100);
    shifted.allocate(&at(0), "a", 5, 50, "bc").unwrap();
    assert_ne!(tagged.merkle_root(), shifted.merkle_root());
}

#[test]
fn snapshot_round_trip_and_tamper_detection() {
    let mut ledger = ledger(100);
    ledger.allocate(&at(0), USER, 10, 120, "web").unwrap();
    ledger.allocate(&at(0), USER2, 5, 120, "app").unwrap();
    ledger.propose_owner(&at(0), "alice").unwrap();
    ledger.blacklist(&at(0), "mallory").unwrap();

    let snapshot = ledger.snapshot();
    let json = serde_json::to_string(&snapshot).unwrap();
    let decoded: LedgerSnapshot = serde_json::from_str(&json).unwrap();
    let restored = LoyaltyLedger::from_snapshot(decoded).unwrap();
    assert_eq!(restored.snapshot(), snapshot);
    assert_eq!(restored.coupons_for(USER), &[1]);

    let mut tampered = snapshot;
    tampered.coupons[0].remaining_amount = 1;
    assert!(matches!(
        LoyaltyLedger::from_snapshot(tampered),
        Err(SnapshotError::RootMismatch { .. })
    ));
}

#[test]
fn random_operations_preserve_invariants() {
    let mut rng = StdRng::seed_from_u64(0x10_7A17);
    let users = ["u1", "u2", "u3"];
    let mut ledger = ledger(500);
    let mut now: Timestamp = 0;
    let mut remaining: std::collections::BTreeMap<CouponId, Points> = Default::default();

    for _ in 0..2_000 {
        now += rng.gen_range(0..5);
        let ctx = at(now);
        let user = users[rng.gen_range(0..users.len())];
        match rng.gen_range(0..4) {
            0 => {
                let amount = rng.gen_range(0..60);
                let expiry = now + rng.gen_range(0..40);
                if let Ok(r) = ledger.allocate(&ctx, user, amount, expiry, "") {
                    remaining.insert(r.value, amount);
                }
            }
            1 => {
                let before = ledger.total_supply();
                ledger.balance_of(&ctx, user).unwrap();
                assert_eq!(ledger.total_supply(), before);
            }
            2 => {
                ledger.redeem(&ctx, user, rng.gen_range(0..80)).unwrap();
            }
            _ => {
                let ids = ledger.coupons_for(user).to_vec();
                if let Some(id) = ids.first() {
                    let _ = ledger.modify(&ctx, *id, rng.gen_range(0..40));
                    remaining.insert(*id, ledger.coupon(*id).unwrap().remaining_amount);
                }
            }
        }
        ledger.check_invariants().unwrap();
        // Remaining amounts only move up through `modify`.
        for coupon in ledger.coupons() {
            let last = remaining.entry(coupon.id).or_insert(coupon.remaining_amount);
            assert!(coupon.remaining_amount <= *last);
            *last = coupon.remaining_amount;
        }
    }
}
