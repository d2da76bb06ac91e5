//! ccu-ledger
//!
//! Resource reservation ledger for warehouse stock and empty warehouse bays.
//!
//! - Warehouse stock and bay capacity are replaced wholesale from telemetry.
//! - Two independent reservation books (stock, bay), each keyed by order id.
//! - Reservations are granted only while
//!   `reserved(type, warehouse) < available(type, warehouse)`.
//! - An order never changes material type: a second reservation of a
//!   different type is a [`ReservationConflict`].
//!
//! Deterministic, pure logic. No IO. Timestamps are passed in.

mod ledger;

pub use ledger::{
    Reservation, ReservationConflict, ReservationKind, ReservationLedger, StoredLoad,
};
