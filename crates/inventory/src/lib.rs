//! Inventory reservation domain.
//!
//! Business rules for product stock and the holds placed against it,
//! implemented as deterministic domain logic (no IO, no HTTP, no storage).

pub mod reservation;
pub mod stock;

pub use reservation::{Reservation, ReservationStatus};
pub use stock::{
    CommitReservation, ExpireReservations, InventoryCommand, InventoryEvent, ProductRegistered,
    ProductStock, PurgeReservations, ReceiveStock, RegisterProduct, ReleaseReservation,
    ReservationResolved, ReservationsPurged, ReserveStock, StockLevels, StockReceived,
    StockReserved,
};
