use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use stockhold_core::{ProductId, ReservationId};
use stockhold_inventory::{InventoryEvent, ProductStock};

use super::{StockGuard, StockStore, StoreError};

type Slot = Arc<Mutex<ProductStock>>;
type ReservationIndex = Arc<RwLock<HashMap<ReservationId, ProductId>>>;

/// In-memory stock store for tests/dev.
///
/// Sharded lock table: the outer `RwLock` only guards the product → slot map
/// and is never held across an await; each product's record sits behind its
/// own async mutex, which is what serializes mutations.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    products: RwLock<HashMap<ProductId, Slot>>,
    index: ReservationIndex,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, product_id: &ProductId) -> Result<Option<Slot>, StoreError> {
        let map = self.products.read().map_err(|_| poisoned())?;
        Ok(map.get(product_id).cloned())
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn insert(&self, stock: ProductStock) -> Result<bool, StoreError> {
        let mut map = self.products.write().map_err(|_| poisoned())?;
        if map.contains_key(stock.product_id()) {
            return Ok(false);
        }

        let mut index = self.index.write().map_err(|_| poisoned())?;
        for r in stock.reservations() {
            index.insert(r.id, stock.product_id().clone());
        }
        map.insert(stock.product_id().clone(), Arc::new(Mutex::new(stock)));
        Ok(true)
    }

    async fn lock(
        &self,
        product_id: &ProductId,
    ) -> Result<Option<Box<dyn StockGuard>>, StoreError> {
        let Some(slot) = self.slot(product_id)? else {
            return Ok(None);
        };

        let guard = slot.lock_owned().await;
        Ok(Some(Box::new(InMemoryStockGuard {
            guard,
            index: self.index.clone(),
        })))
    }

    async fn load(&self, product_id: &ProductId) -> Result<Option<ProductStock>, StoreError> {
        let Some(slot) = self.slot(product_id)? else {
            return Ok(None);
        };
        let stock = slot.lock().await;
        Ok(Some(stock.clone()))
    }

    async fn locate(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<ProductId>, StoreError> {
        let index = self.index.read().map_err(|_| poisoned())?;
        Ok(index.get(&reservation_id).cloned())
    }

    async fn product_ids(&self) -> Result<Vec<ProductId>, StoreError> {
        let map = self.products.read().map_err(|_| poisoned())?;
        let mut ids: Vec<ProductId> = map.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

struct InMemoryStockGuard {
    guard: OwnedMutexGuard<ProductStock>,
    index: ReservationIndex,
}

#[async_trait]
impl StockGuard for InMemoryStockGuard {
    fn stock(&self) -> &ProductStock {
        &self.guard
    }

    async fn save(
        mut self: Box<Self>,
        stock: ProductStock,
        events: &[InventoryEvent],
    ) -> Result<(), StoreError> {
        {
            let mut index = self.index.write().map_err(|_| poisoned())?;
            for event in events {
                match event {
                    InventoryEvent::StockReserved(e) => {
                        index.insert(e.reservation_id, e.product_id.clone());
                    }
                    InventoryEvent::ReservationsPurged(e) => {
                        for id in &e.reservation_ids {
                            index.remove(id);
                        }
                    }
                    _ => {}
                }
            }
        }

        *self.guard = stock;
        Ok(())
    }
}
