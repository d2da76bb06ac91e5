//! Scenario: reservations never exceed warehouse capacity
//!
//! # Invariants under test
//!
//! 1. `Σ bay-reservations(type, wh) ≤ bays(type, wh) − stock(type, wh)` after
//!    every grant, for an arbitrary interleaving of reserve / release calls.
//! 2. `Σ stock-reservations(type, wh) ≤ stock(type, wh)` likewise.
//! 3. Bays are typed: exhausting BLUE does not consume RED or WHITE.
//!
//! Pure in-process; no IO.

use std::collections::BTreeMap;

use ccu_ledger::{ReservationKind, ReservationLedger, StoredLoad};
use ccu_schemas::WorkpieceType::{self, Blue, Red, White};

fn three_of_each() -> BTreeMap<WorkpieceType, u32> {
    BTreeMap::from([(Red, 3), (White, 3), (Blue, 3)])
}

fn empty_warehouse() -> ReservationLedger {
    let mut l = ReservationLedger::new();
    l.set_stock("HBW1", Vec::new());
    l.set_bays("HBW1", three_of_each());
    l
}

fn assert_within_capacity(l: &ReservationLedger) {
    for ty in WorkpieceType::ALL {
        let bays = l.reserved_count(ReservationKind::Bay, "HBW1", ty);
        let room = l.bay_capacity("HBW1", ty) - l.stock_count("HBW1", ty);
        assert!(bays <= room, "{ty}: {bays} bay reservations for {room} empty bays");

        let stock = l.reserved_count(ReservationKind::Stock, "HBW1", ty);
        assert!(stock <= l.stock_count("HBW1", ty));
    }
}

#[test]
fn red_then_blue_then_blue_succeed_and_fourth_blue_fails() {
    let mut l = empty_warehouse();

    assert!(l.reserve_empty_bay("s-red", Red, 1).unwrap().is_some());
    assert!(l.reserve_empty_bay("s-blue-1", Blue, 1).unwrap().is_some());
    assert!(l.reserve_empty_bay("s-blue-2", Blue, 1).unwrap().is_some());
    assert!(l.reserve_empty_bay("s-blue-3", Blue, 1).unwrap().is_some());

    // Only three BLUE bays exist.
    assert!(l.reserve_empty_bay("s-blue-4", Blue, 1).unwrap().is_none());

    // Other colors are unaffected.
    assert!(l.reserve_empty_bay("s-white", White, 1).unwrap().is_some());
    assert_within_capacity(&l);
}

#[test]
fn repeated_reservation_does_not_grow_the_book() {
    let mut l = empty_warehouse();
    for _ in 0..5 {
        assert_eq!(l.reserve_empty_bay("s1", Red, 1).unwrap().as_deref(), Some("HBW1"));
    }
    assert_eq!(l.reserved_count(ReservationKind::Bay, "HBW1", Red), 1);
}

#[test]
fn interleaved_reserve_and_release_stays_within_capacity() {
    let mut l = empty_warehouse();
    l.set_stock(
        "HBW1",
        vec![
            StoredLoad { bay: "A1".into(), workpiece_type: Red, load_id: None },
            StoredLoad { bay: "A2".into(), workpiece_type: Red, load_id: None },
            StoredLoad { bay: "B1".into(), workpiece_type: White, load_id: None },
        ],
    );

    let colors = [Red, White, Blue];
    for i in 0..40u32 {
        let ty = colors[(i % 3) as usize];
        let order = format!("o{}", i % 7);
        if i % 5 == 4 {
            l.remove_reservation(&order);
        } else if i % 2 == 0 {
            // An order keeps one color; ignore conflicts from reused ids.
            let _ = l.reserve_workpiece(&order, ty, 1);
        } else {
            let _ = l.reserve_empty_bay(&format!("s{order}"), ty, 1);
        }
        assert_within_capacity(&l);
    }
}
