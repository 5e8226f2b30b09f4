//! Stock persistence boundary.
//!
//! A store keeps one [`ProductStock`] aggregate per product (stock counters
//! plus the reservations held against it) and hands out exclusive,
//! per-product write guards. The guard is the serialization point for every
//! mutation of that product: two guards for the same product never coexist,
//! guards for different products never wait on each other.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use stockhold_core::{ProductId, ReservationId};
use stockhold_inventory::{InventoryEvent, ProductStock};

pub use in_memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;

/// Persistence-layer failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend unreachable, pool exhausted, lock poisoned, query failed.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Persisted rows do not describe a valid stock record.
    #[error("corrupt stock record: {0}")]
    Corrupt(String),
}

/// Storage for product stock records and their reservations.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Persist a freshly registered product.
    ///
    /// Returns `false` (and changes nothing) if the product already exists.
    async fn insert(&self, stock: ProductStock) -> Result<bool, StoreError>;

    /// Acquire the product's write guard, or `None` for an unknown product.
    async fn lock(&self, product_id: &ProductId)
    -> Result<Option<Box<dyn StockGuard>>, StoreError>;

    /// Read-committed snapshot of a product, without taking its write guard
    /// for longer than the read itself.
    async fn load(&self, product_id: &ProductId) -> Result<Option<ProductStock>, StoreError>;

    /// Resolve the product a reservation belongs to.
    async fn locate(&self, reservation_id: ReservationId)
    -> Result<Option<ProductId>, StoreError>;

    /// Every registered product, in identifier order.
    async fn product_ids(&self) -> Result<Vec<ProductId>, StoreError>;
}

/// Exclusive write access to one product's stock record.
///
/// Dropping a guard without calling [`StockGuard::save`] discards the
/// mutation (rollback).
#[async_trait]
pub trait StockGuard: Send {
    /// State as loaded under the guard.
    fn stock(&self) -> &ProductStock;

    /// Persist `stock` (the loaded state with `events` applied) and release
    /// the guard.
    async fn save(
        self: Box<Self>,
        stock: ProductStock,
        events: &[InventoryEvent],
    ) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    async fn insert(&self, stock: ProductStock) -> Result<bool, StoreError> {
        (**self).insert(stock).await
    }

    async fn lock(
        &self,
        product_id: &ProductId,
    ) -> Result<Option<Box<dyn StockGuard>>, StoreError> {
        (**self).lock(product_id).await
    }

    async fn load(&self, product_id: &ProductId) -> Result<Option<ProductStock>, StoreError> {
        (**self).load(product_id).await
    }

    async fn locate(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<ProductId>, StoreError> {
        (**self).locate(reservation_id).await
    }

    async fn product_ids(&self) -> Result<Vec<ProductId>, StoreError> {
        (**self).product_ids().await
    }
}
