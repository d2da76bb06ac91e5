use std::collections::{BTreeMap, BTreeSet};

use ccu_schemas::{StockSnapshot, StockedBay, WarehouseStock, WorkpieceType};
use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReservationKind {
    /// One stocked workpiece (production orders).
    Stock,
    /// One empty bay (storage orders).
    Bay,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reservation {
    pub warehouse_id: String,
    pub material_type: WorkpieceType,
    pub order_id: String,
}

/// A workpiece sitting in a warehouse bay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredLoad {
    pub bay: String,
    pub workpiece_type: WorkpieceType,
    pub load_id: Option<String>,
}

/// An order already holds a reservation of a different material type.
///
/// **Not retryable.** This is a logic defect upstream: an order's material
/// type never changes after its first reservation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReservationConflict {
    pub order_id: String,
    pub kind: ReservationKind,
    pub held: WorkpieceType,
    pub requested: WorkpieceType,
}

impl std::fmt::Display for ReservationConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "reservation invariant: order {} holds a {:?} reservation for {} and requested {}",
            self.order_id, self.kind, self.held, self.requested
        )
    }
}

impl std::error::Error for ReservationConflict {}

#[derive(Clone, Debug)]
struct Warehouse {
    serial: String,
    activated: bool,
    stock: Vec<StoredLoad>,
    bays: BTreeMap<WorkpieceType, u32>,
}

impl Warehouse {
    fn new(serial: &str) -> Self {
        Self {
            serial: serial.to_string(),
            activated: true,
            stock: Vec::new(),
            bays: BTreeMap::new(),
        }
    }

    fn stock_of(&self, ty: WorkpieceType) -> u32 {
        self.stock.iter().filter(|l| l.workpiece_type == ty).count() as u32
    }

    fn capacity_of(&self, ty: WorkpieceType) -> u32 {
        self.bays.get(&ty).copied().unwrap_or(0)
    }

    fn available(&self, kind: ReservationKind, ty: WorkpieceType) -> u32 {
        match kind {
            ReservationKind::Stock => self.stock_of(ty),
            ReservationKind::Bay => self.capacity_of(ty).saturating_sub(self.stock_of(ty)),
        }
    }
}

// ---------------------------------------------------------------------------
// ReservationLedger
// ---------------------------------------------------------------------------

/// Stock / bay ledger across all warehouses of the cell.
///
/// Warehouses are preferred in the order they first reported. Only
/// `reserve_*` and `remove_reservation` touch the books; queries never mutate.
#[derive(Clone, Debug, Default)]
pub struct ReservationLedger {
    warehouses: Vec<Warehouse>,
    stock_reservations: BTreeMap<String, Reservation>,
    bay_reservations: BTreeMap<String, Reservation>,
}

impl ReservationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn warehouse_mut(&mut self, serial: &str) -> &mut Warehouse {
        if let Some(i) = self.warehouses.iter().position(|w| w.serial == serial) {
            return &mut self.warehouses[i];
        }
        self.warehouses.push(Warehouse::new(serial));
        let last = self.warehouses.len() - 1;
        &mut self.warehouses[last]
    }

    fn warehouse(&self, serial: &str) -> Option<&Warehouse> {
        self.warehouses.iter().find(|w| w.serial == serial)
    }

    // --- telemetry-fed state ---------------------------------------------

    /// Replace the stocked loads of a warehouse. Registers it on first sight.
    pub fn set_stock(&mut self, serial: &str, loads: Vec<StoredLoad>) {
        self.warehouse_mut(serial).stock = loads;
    }

    /// Replace the bay capacity per type of a warehouse.
    pub fn set_bays(&mut self, serial: &str, bays: BTreeMap<WorkpieceType, u32>) {
        self.warehouse_mut(serial).bays = bays;
    }

    pub fn has_bays(&self, serial: &str) -> bool {
        self.warehouse(serial)
            .map(|w| !w.bays.is_empty())
            .unwrap_or(false)
    }

    pub fn is_known(&self, serial: &str) -> bool {
        self.warehouse(serial).is_some()
    }

    /// Deactivated warehouses keep their data but receive no new reservations.
    pub fn set_activated(&mut self, serial: &str, activated: bool) {
        self.warehouse_mut(serial).activated = activated;
    }

    pub fn warehouse_serials(&self) -> Vec<&str> {
        self.warehouses.iter().map(|w| w.serial.as_str()).collect()
    }

    // --- reservations ----------------------------------------------------

    /// Reserve one stocked workpiece of `ty` for `order_id`.
    ///
    /// Returns the warehouse serial, or `None` when nothing is available.
    /// Idempotent for the same type.
    pub fn reserve_workpiece(
        &mut self,
        order_id: &str,
        ty: WorkpieceType,
        transporter_count: usize,
    ) -> Result<Option<String>, ReservationConflict> {
        self.reserve(ReservationKind::Stock, order_id, ty, transporter_count)
    }

    /// Reserve one empty bay for `ty` for `order_id`. Same contract as
    /// [`reserve_workpiece`](Self::reserve_workpiece).
    pub fn reserve_empty_bay(
        &mut self,
        order_id: &str,
        ty: WorkpieceType,
        transporter_count: usize,
    ) -> Result<Option<String>, ReservationConflict> {
        self.reserve(ReservationKind::Bay, order_id, ty, transporter_count)
    }

    fn book(&self, kind: ReservationKind) -> &BTreeMap<String, Reservation> {
        match kind {
            ReservationKind::Stock => &self.stock_reservations,
            ReservationKind::Bay => &self.bay_reservations,
        }
    }

    fn reserve(
        &mut self,
        kind: ReservationKind,
        order_id: &str,
        ty: WorkpieceType,
        transporter_count: usize,
    ) -> Result<Option<String>, ReservationConflict> {
        if let Some(existing) = self.book(kind).get(order_id) {
            if existing.material_type == ty {
                return Ok(Some(existing.warehouse_id.clone()));
            }
            return Err(ReservationConflict {
                order_id: order_id.to_string(),
                kind,
                held: existing.material_type,
                requested: ty,
            });
        }

        let granted = self
            .preference_order(transporter_count)
            .into_iter()
            .find(|serial| {
                self.warehouse(serial)
                    .map(|w| self.reserved_count(kind, serial, ty) < w.available(kind, ty))
                    .unwrap_or(false)
            });

        let Some(serial) = granted else {
            return Ok(None);
        };

        let reservation = Reservation {
            warehouse_id: serial.clone(),
            material_type: ty,
            order_id: order_id.to_string(),
        };
        match kind {
            ReservationKind::Stock => self
                .stock_reservations
                .insert(order_id.to_string(), reservation),
            ReservationKind::Bay => self
                .bay_reservations
                .insert(order_id.to_string(), reservation),
        };
        Ok(Some(serial))
    }

    /// Activated warehouses in preference order.
    ///
    /// With more than one transporter, warehouses already serving a
    /// reservation go last so concurrent orders spread across warehouses.
    /// Every held reservation counts, not only the requesting order's: an
    /// order holds at most one per book, so the cell-wide view is what
    /// separates it from the orders running beside it.
    fn preference_order(&self, transporter_count: usize) -> Vec<String> {
        let active = self.warehouses.iter().filter(|w| w.activated);
        if transporter_count <= 1 {
            return active.map(|w| w.serial.clone()).collect();
        }
        let used: BTreeSet<&str> = self
            .stock_reservations
            .values()
            .chain(self.bay_reservations.values())
            .map(|r| r.warehouse_id.as_str())
            .collect();
        let (fresh, busy): (Vec<&Warehouse>, Vec<&Warehouse>) =
            active.partition(|w| !used.contains(w.serial.as_str()));
        fresh
            .into_iter()
            .chain(busy)
            .map(|w| w.serial.clone())
            .collect()
    }

    /// Release both the stock and the bay reservation of `order_id`.
    /// Returns `true` if anything was held.
    pub fn remove_reservation(&mut self, order_id: &str) -> bool {
        let stock = self.stock_reservations.remove(order_id).is_some();
        let bay = self.bay_reservations.remove(order_id).is_some();
        stock || bay
    }

    // --- queries ---------------------------------------------------------

    pub fn reservation(&self, kind: ReservationKind, order_id: &str) -> Option<&Reservation> {
        self.book(kind).get(order_id)
    }

    /// Warehouse holding any reservation of `order_id`.
    pub fn warehouse_for_order(&self, order_id: &str) -> Option<&str> {
        self.stock_reservations
            .get(order_id)
            .or_else(|| self.bay_reservations.get(order_id))
            .map(|r| r.warehouse_id.as_str())
    }

    pub fn reserved_count(&self, kind: ReservationKind, serial: &str, ty: WorkpieceType) -> u32 {
        self.book(kind)
            .values()
            .filter(|r| r.warehouse_id == serial && r.material_type == ty)
            .count() as u32
    }

    pub fn stock_count(&self, serial: &str, ty: WorkpieceType) -> u32 {
        self.warehouse(serial).map(|w| w.stock_of(ty)).unwrap_or(0)
    }

    pub fn bay_capacity(&self, serial: &str, ty: WorkpieceType) -> u32 {
        self.warehouse(serial).map(|w| w.capacity_of(ty)).unwrap_or(0)
    }

    /// Unreserved stock of `ty` across activated warehouses.
    pub fn available_workpieces(&self, ty: WorkpieceType) -> u32 {
        self.unreserved(ReservationKind::Stock, ty)
    }

    /// Unreserved empty bays for `ty` across activated warehouses.
    pub fn free_bays(&self, ty: WorkpieceType) -> u32 {
        self.unreserved(ReservationKind::Bay, ty)
    }

    fn unreserved(&self, kind: ReservationKind, ty: WorkpieceType) -> u32 {
        self.warehouses
            .iter()
            .filter(|w| w.activated)
            .map(|w| {
                w.available(kind, ty)
                    .saturating_sub(self.reserved_count(kind, &w.serial, ty))
            })
            .sum()
    }

    /// Per-bay view for publication. Within each type, the first `n` stocked
    /// loads are flagged reserved, `n` being the stock reservations held.
    pub fn snapshot(&self, ts: DateTime<Utc>) -> StockSnapshot {
        let warehouses = self
            .warehouses
            .iter()
            .map(|w| {
                let mut flagged: BTreeMap<WorkpieceType, u32> = BTreeMap::new();
                let mut loads = w.stock.clone();
                loads.sort_by(|a, b| a.bay.cmp(&b.bay));
                let bays = loads
                    .into_iter()
                    .map(|l| {
                        let budget = self.reserved_count(
                            ReservationKind::Stock,
                            &w.serial,
                            l.workpiece_type,
                        );
                        let used = flagged.entry(l.workpiece_type).or_insert(0);
                        let reserved = *used < budget;
                        if reserved {
                            *used += 1;
                        }
                        StockedBay {
                            bay: l.bay,
                            workpiece_type: l.workpiece_type,
                            load_id: l.load_id,
                            reserved,
                        }
                    })
                    .collect();
                let free_bays = WorkpieceType::ALL
                    .iter()
                    .map(|ty| {
                        let held = self.reserved_count(ReservationKind::Bay, &w.serial, *ty);
                        let free = w.available(ReservationKind::Bay, *ty).saturating_sub(held);
                        (*ty, free)
                    })
                    .collect();
                WarehouseStock {
                    serial_number: w.serial.clone(),
                    activated: w.activated,
                    bays,
                    free_bays,
                }
            })
            .collect();
        StockSnapshot { ts, warehouses }
    }
}
