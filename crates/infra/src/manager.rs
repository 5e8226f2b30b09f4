//! Reservation manager (application-level orchestration).
//!
//! Every mutation runs the same pipeline against one product:
//!
//! ```text
//! 1. Lock the product (per-product write guard from the store)
//!   ↓
//! 2. Handle the command (pure decision logic, produces events)
//!   ↓
//! 3. Apply events to a copy of the loaded state, re-check invariants
//!   ↓
//! 4. Save through the guard (commit) and release the lock
//! ```
//!
//! Reads never take the write guard; they load a snapshot and evaluate
//! expiry against the clock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use stockhold_core::{Aggregate, DomainError, ProductId, ReservationId};
use stockhold_inventory::{
    CommitReservation, ExpireReservations, InventoryCommand, InventoryEvent, ProductStock,
    PurgeReservations, ReceiveStock, RegisterProduct, ReleaseReservation, Reservation,
    ReserveStock, StockLevels,
};

use crate::clock::{Clock, SystemClock};
use crate::store::{StockStore, StoreError};

/// Manager-level error with a stable machine-readable kind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReservationError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
}

impl ReservationError {
    pub fn kind(&self) -> &'static str {
        match self {
            ReservationError::Validation(_) => "validation_error",
            ReservationError::NotFound(_) => "not_found",
            ReservationError::InsufficientStock { .. } => "insufficient_stock",
            ReservationError::InvalidState(_) => "invalid_state",
            ReservationError::Conflict(_) => "conflict",
            ReservationError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

impl From<DomainError> for ReservationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                ReservationError::Validation(msg)
            }
            DomainError::NotFound(what) => ReservationError::NotFound(what),
            DomainError::InsufficientStock {
                requested,
                available,
            } => ReservationError::InsufficientStock {
                requested,
                available,
            },
            DomainError::InvalidState(msg) => ReservationError::InvalidState(msg),
            DomainError::Conflict(msg) => ReservationError::Conflict(msg),
            // Loaded or computed state broke an invariant: the record itself is bad.
            DomainError::InvariantViolation(msg) => {
                ReservationError::StoreUnavailable(StoreError::Corrupt(msg))
            }
        }
    }
}

/// Reservation lifetime rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationPolicy {
    /// Hold duration when the caller does not ask for one.
    pub default_ttl: chrono::Duration,
    /// Upper clamp for caller-supplied durations.
    pub max_ttl: chrono::Duration,
    /// How long terminal reservations are kept before the sweep purges them.
    pub purge_retention: chrono::Duration,
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            default_ttl: chrono::Duration::seconds(900),
            max_ttl: chrono::Duration::seconds(3600),
            purge_retention: chrono::Duration::seconds(86_400),
        }
    }
}

impl ReservationPolicy {
    pub fn from_std(
        default_ttl: std::time::Duration,
        max_ttl: std::time::Duration,
        purge_retention: std::time::Duration,
    ) -> Self {
        Self {
            default_ttl: to_chrono(default_ttl),
            max_ttl: to_chrono(max_ttl),
            purge_retention: to_chrono(purge_retention),
        }
    }

    /// Effective hold duration: the default, or the requested seconds clamped
    /// to `[1s, max_ttl]`.
    pub fn ttl(&self, requested_secs: Option<i64>) -> chrono::Duration {
        match requested_secs {
            None => self.default_ttl,
            Some(secs) => {
                let max = self.max_ttl.num_seconds().max(1);
                chrono::Duration::seconds(secs.clamp(1, max))
            }
        }
    }
}

fn to_chrono(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub products_scanned: usize,
    pub expired: usize,
    pub purged: usize,
    /// Products skipped because their sweep failed; retried on the next run.
    pub failed: usize,
}

/// Stock and reservation operations over a [`StockStore`].
#[derive(Debug)]
pub struct ReservationManager<S, C = SystemClock> {
    store: S,
    clock: C,
    policy: ReservationPolicy,
}

impl<S> ReservationManager<S> {
    pub fn new(store: S, policy: ReservationPolicy) -> Self {
        Self::with_clock(store, SystemClock, policy)
    }
}

impl<S, C> ReservationManager<S, C> {
    pub fn with_clock(store: S, clock: C, policy: ReservationPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &ReservationPolicy {
        &self.policy
    }
}

impl<S, C> ReservationManager<S, C>
where
    S: StockStore,
    C: Clock,
{
    /// Create a stock record with nothing reserved.
    pub async fn register_product(
        &self,
        product_id: ProductId,
        total_stock: i64,
    ) -> Result<StockLevels, ReservationError> {
        let now = self.clock.now();
        let mut stock = ProductStock::empty(product_id.clone());
        let events = stock.handle(&InventoryCommand::RegisterProduct(RegisterProduct {
            product_id: product_id.clone(),
            total_stock,
            occurred_at: now,
        }))?;
        for e in &events {
            stock.apply(e);
        }

        if !self.store.insert(stock.clone()).await? {
            return Err(ReservationError::Conflict(format!(
                "product '{product_id}' already exists"
            )));
        }

        log_events(&product_id, &events);
        Ok(stock.levels(now))
    }

    /// Current stock figures with lapsed holds no longer counted.
    pub async fn get_stock(&self, product_id: &ProductId) -> Result<StockLevels, ReservationError> {
        let now = self.clock.now();
        let stock = self
            .store
            .load(product_id)
            .await?
            .ok_or_else(|| product_not_found(product_id))?;
        Ok(stock.levels(now))
    }

    /// Add received goods to a product's total stock.
    pub async fn restock(
        &self,
        product_id: &ProductId,
        quantity: i64,
    ) -> Result<StockLevels, ReservationError> {
        let done = self
            .execute(product_id, |now| {
                Ok(InventoryCommand::ReceiveStock(ReceiveStock {
                    product_id: product_id.clone(),
                    quantity,
                    occurred_at: now,
                }))
            })
            .await?;
        Ok(done.stock.levels(done.now))
    }

    /// Place a pending hold of `quantity` units.
    ///
    /// `ttl_secs` overrides the default hold duration (clamped by the policy).
    pub async fn reserve(
        &self,
        product_id: &ProductId,
        quantity: i64,
        ttl_secs: Option<i64>,
    ) -> Result<Reservation, ReservationError> {
        if quantity <= 0 {
            return Err(ReservationError::Validation(
                "quantity must be a positive integer".to_string(),
            ));
        }

        let reservation_id = ReservationId::new();
        let ttl = self.policy.ttl(ttl_secs);
        let done = self
            .execute(product_id, |now| {
                let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
                    ReservationError::Validation(format!(
                        "a {}s hold ends past the latest supported date",
                        ttl.num_seconds()
                    ))
                })?;
                Ok(InventoryCommand::ReserveStock(ReserveStock {
                    product_id: product_id.clone(),
                    reservation_id,
                    quantity,
                    expires_at,
                    occurred_at: now,
                }))
            })
            .await?;

        done.stock.reservation(&reservation_id).cloned().ok_or_else(|| {
            StoreError::Corrupt(format!("reservation {reservation_id} missing after save")).into()
        })
    }

    /// Release a hold. Releasing a hold that is no longer pending changes
    /// nothing and reports its current status.
    pub async fn release(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Reservation, ReservationError> {
        let product_id = self.locate(reservation_id).await?;
        let done = self
            .execute(&product_id, |now| {
                Ok(InventoryCommand::ReleaseReservation(ReleaseReservation {
                    product_id: product_id.clone(),
                    reservation_id,
                    occurred_at: now,
                }))
            })
            .await?;

        let reservation = find(&done.stock, reservation_id)?.as_of(done.now);
        if !done
            .events
            .iter()
            .any(|e| matches!(e, InventoryEvent::ReservationReleased(_)))
        {
            debug!(
                reservation_id = %reservation_id,
                status = %reservation.status,
                "release of a resolved reservation is a no-op"
            );
        }
        Ok(reservation)
    }

    /// Turn a pending hold into a permanent stock deduction.
    pub async fn commit(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Reservation, ReservationError> {
        let product_id = self.locate(reservation_id).await?;
        let done = self
            .execute(&product_id, |now| {
                Ok(InventoryCommand::CommitReservation(CommitReservation {
                    product_id: product_id.clone(),
                    reservation_id,
                    occurred_at: now,
                }))
            })
            .await?;

        Ok(find(&done.stock, reservation_id)?.as_of(done.now))
    }

    /// A reservation as observed now (a lapsed hold reports `Expired`).
    pub async fn get_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Reservation, ReservationError> {
        let product_id = self.locate(reservation_id).await?;
        let now = self.clock.now();
        let stock = self
            .store
            .load(&product_id)
            .await?
            .ok_or_else(|| reservation_not_found(reservation_id))?;
        Ok(find(&stock, reservation_id)?.as_of(now))
    }

    /// Materialize lapsed holds and purge old terminal ones, product by product.
    ///
    /// A product whose sweep fails is logged, counted in
    /// [`SweepReport::failed`] and skipped; the rest are still swept.
    pub async fn sweep_expired(&self) -> Result<SweepReport, ReservationError> {
        let mut report = SweepReport::default();

        for product_id in self.store.product_ids().await? {
            report.products_scanned += 1;
            match self.sweep_product(&product_id).await {
                Ok((expired, purged)) => {
                    report.expired += expired;
                    report.purged += purged;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        product_id = %product_id,
                        kind = e.kind(),
                        error = %e,
                        "expiry sweep skipped product"
                    );
                }
            }
        }

        Ok(report)
    }

    async fn sweep_product(&self, product_id: &ProductId) -> Result<(usize, usize), ReservationError> {
        let expired = self
            .execute(product_id, |now| {
                Ok(InventoryCommand::ExpireReservations(ExpireReservations {
                    product_id: product_id.clone(),
                    occurred_at: now,
                }))
            })
            .await?
            .events
            .len();

        let retention = self.policy.purge_retention;
        let purged = self
            .execute(product_id, |now| {
                // A cutoff before the earliest representable instant purges nothing.
                let resolved_before = now
                    .checked_sub_signed(retention)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                Ok(InventoryCommand::PurgeReservations(PurgeReservations {
                    product_id: product_id.clone(),
                    resolved_before,
                    occurred_at: now,
                }))
            })
            .await?
            .events
            .iter()
            .map(|e| match e {
                InventoryEvent::ReservationsPurged(p) => p.reservation_ids.len(),
                _ => 0,
            })
            .sum();

        Ok((expired, purged))
    }

    async fn locate(&self, reservation_id: ReservationId) -> Result<ProductId, ReservationError> {
        self.store
            .locate(reservation_id)
            .await?
            .ok_or_else(|| reservation_not_found(reservation_id))
    }

    /// Lock, decide, apply, save.
    ///
    /// `build` turns the clock reading taken under the lock into the command,
    /// so expiry is judged at the moment the product is held.
    async fn execute<F>(&self, product_id: &ProductId, build: F) -> Result<Executed, ReservationError>
    where
        F: FnOnce(DateTime<Utc>) -> Result<InventoryCommand, ReservationError> + Send,
    {
        let guard = self
            .store
            .lock(product_id)
            .await?
            .ok_or_else(|| product_not_found(product_id))?;

        let now = self.clock.now();
        let command = build(now)?;
        let events = guard.stock().handle(&command)?;
        if events.is_empty() {
            // Nothing to persist; dropping the guard releases the lock.
            return Ok(Executed {
                stock: guard.stock().clone(),
                events,
                now,
            });
        }

        let mut next = guard.stock().clone();
        for e in &events {
            next.apply(e);
        }
        next.check_invariants()?;

        guard.save(next.clone(), &events).await?;
        log_events(product_id, &events);
        Ok(Executed {
            stock: next,
            events,
            now,
        })
    }
}

/// Post-command state, the events that produced it, and the instant they
/// were decided at.
struct Executed {
    stock: ProductStock,
    events: Vec<InventoryEvent>,
    now: DateTime<Utc>,
}

fn find(stock: &ProductStock, reservation_id: ReservationId) -> Result<&Reservation, ReservationError> {
    stock
        .reservation(&reservation_id)
        .ok_or_else(|| reservation_not_found(reservation_id))
}

fn product_not_found(product_id: &ProductId) -> ReservationError {
    ReservationError::NotFound(format!("product '{product_id}'"))
}

fn reservation_not_found(reservation_id: ReservationId) -> ReservationError {
    ReservationError::NotFound(format!("reservation {reservation_id}"))
}

fn log_events(product_id: &ProductId, events: &[InventoryEvent]) {
    for event in events {
        match event {
            InventoryEvent::StockReserved(e) => info!(
                event_type = event.event_type(),
                product_id = %product_id,
                reservation_id = %e.reservation_id,
                quantity = e.quantity,
                expires_at = %e.expires_at,
                "stock reserved"
            ),
            InventoryEvent::ReservationReleased(e)
            | InventoryEvent::ReservationCommitted(e)
            | InventoryEvent::ReservationExpired(e) => info!(
                event_type = event.event_type(),
                product_id = %product_id,
                reservation_id = %e.reservation_id,
                quantity = e.quantity,
                "reservation resolved"
            ),
            InventoryEvent::ProductRegistered(e) => info!(
                event_type = event.event_type(),
                product_id = %product_id,
                total_stock = e.total_stock,
                "product registered"
            ),
            InventoryEvent::StockReceived(e) => info!(
                event_type = event.event_type(),
                product_id = %product_id,
                quantity = e.quantity,
                "stock received"
            ),
            InventoryEvent::ReservationsPurged(e) => info!(
                event_type = event.event_type(),
                product_id = %product_id,
                count = e.reservation_ids.len(),
                "reservations purged"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use stockhold_inventory::ReservationStatus;

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStockStore;

    type TestManager = ReservationManager<InMemoryStockStore, Arc<ManualClock>>;

    fn setup() -> (TestManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let manager = ReservationManager::with_clock(
            InMemoryStockStore::new(),
            clock.clone(),
            ReservationPolicy::default(),
        );
        (manager, clock)
    }

    fn sku(id: &str) -> ProductId {
        ProductId::parse(id).unwrap()
    }

    fn levels(total: i64, reserved: i64) -> StockLevels {
        StockLevels {
            total_stock: total,
            reserved_stock: reserved,
            available_stock: total - reserved,
        }
    }

    #[tokio::test]
    async fn reserve_insufficient_then_release_scenario() {
        let (m, _) = setup();
        m.register_product(sku("p"), 10).await.unwrap();

        let first = m.reserve(&sku("p"), 7, None).await.unwrap();
        assert_eq!(first.status, ReservationStatus::Pending);
        assert_eq!(m.get_stock(&sku("p")).await.unwrap(), levels(10, 7));

        let err = m.reserve(&sku("p"), 5, None).await.unwrap_err();
        assert_eq!(
            err,
            ReservationError::InsufficientStock {
                requested: 5,
                available: 3
            }
        );
        assert_eq!(err.kind(), "insufficient_stock");

        let released = m.release(first.id).await.unwrap();
        assert_eq!(released.status, ReservationStatus::Released);
        assert_eq!(m.get_stock(&sku("p")).await.unwrap(), levels(10, 0));
    }

    #[tokio::test]
    async fn double_release_reports_status_without_restoring_twice() {
        let (m, _) = setup();
        m.register_product(sku("p"), 10).await.unwrap();
        let r = m.reserve(&sku("p"), 4, None).await.unwrap();
        m.reserve(&sku("p"), 2, None).await.unwrap();

        m.release(r.id).await.unwrap();
        let again = m.release(r.id).await.unwrap();
        assert_eq!(again.status, ReservationStatus::Released);
        assert_eq!(m.get_stock(&sku("p")).await.unwrap(), levels(10, 2));
    }

    #[tokio::test]
    async fn commit_deducts_and_rejects_second_commit() {
        let (m, _) = setup();
        m.register_product(sku("p"), 10).await.unwrap();
        let r = m.reserve(&sku("p"), 3, None).await.unwrap();

        let committed = m.commit(r.id).await.unwrap();
        assert_eq!(committed.status, ReservationStatus::Committed);
        assert_eq!(m.get_stock(&sku("p")).await.unwrap(), levels(7, 0));

        let err = m.commit(r.id).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_state");

        // Releasing a committed hold is a no-op.
        let after = m.release(r.id).await.unwrap();
        assert_eq!(after.status, ReservationStatus::Committed);
        assert_eq!(m.get_stock(&sku("p")).await.unwrap(), levels(7, 0));
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let (m, _) = setup();
        assert_eq!(m.get_stock(&sku("nope")).await.unwrap_err().kind(), "not_found");
        assert_eq!(
            m.reserve(&sku("nope"), 1, None).await.unwrap_err().kind(),
            "not_found"
        );
        assert_eq!(
            m.release(ReservationId::new()).await.unwrap_err().kind(),
            "not_found"
        );
        assert_eq!(
            m.commit(ReservationId::new()).await.unwrap_err().kind(),
            "not_found"
        );
    }

    #[tokio::test]
    async fn validation_and_conflict() {
        let (m, _) = setup();
        assert_eq!(
            m.register_product(sku("p"), -1).await.unwrap_err().kind(),
            "validation_error"
        );
        m.register_product(sku("p"), 1).await.unwrap();
        assert_eq!(
            m.register_product(sku("p"), 1).await.unwrap_err().kind(),
            "conflict"
        );
        assert_eq!(
            m.reserve(&sku("p"), 0, None).await.unwrap_err().kind(),
            "validation_error"
        );
        assert_eq!(
            m.restock(&sku("p"), 0).await.unwrap_err().kind(),
            "validation_error"
        );
        assert_eq!(m.restock(&sku("p"), 4).await.unwrap(), levels(5, 0));
    }

    #[tokio::test]
    async fn lapsed_hold_is_released_for_readers_and_writers() {
        let (m, clock) = setup();
        m.register_product(sku("p"), 10).await.unwrap();
        let r = m.reserve(&sku("p"), 8, Some(60)).await.unwrap();
        assert_eq!(r.expires_at - r.created_at, Duration::seconds(60));

        clock.advance(Duration::seconds(61));

        assert_eq!(m.get_stock(&sku("p")).await.unwrap(), levels(10, 0));
        let view = m.get_reservation(r.id).await.unwrap();
        assert_eq!(view.status, ReservationStatus::Expired);
        assert_eq!(m.commit(r.id).await.unwrap_err().kind(), "invalid_state");

        m.reserve(&sku("p"), 10, None).await.unwrap();
        let stored = m.store().load(&sku("p")).await.unwrap().unwrap();
        assert_eq!(stored.reserved_stock(), 10);
    }

    #[tokio::test]
    async fn ttl_is_defaulted_and_clamped() {
        let (m, _) = setup();
        m.register_product(sku("p"), 10).await.unwrap();

        let r = m.reserve(&sku("p"), 1, None).await.unwrap();
        assert_eq!(r.expires_at - r.created_at, Duration::seconds(900));

        let r = m.reserve(&sku("p"), 1, Some(1_000_000)).await.unwrap();
        assert_eq!(r.expires_at - r.created_at, Duration::seconds(3600));

        let r = m.reserve(&sku("p"), 1, Some(-5)).await.unwrap();
        assert_eq!(r.expires_at - r.created_at, Duration::seconds(1));
    }

    #[tokio::test]
    async fn sweep_expires_then_purges_after_retention() {
        let (m, clock) = setup();
        m.register_product(sku("a"), 5).await.unwrap();
        m.register_product(sku("b"), 5).await.unwrap();
        let lapsed = m.reserve(&sku("a"), 2, Some(10)).await.unwrap();
        let live = m.reserve(&sku("b"), 1, Some(3600)).await.unwrap();

        clock.advance(Duration::seconds(30));
        let report = m.sweep_expired().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                products_scanned: 2,
                expired: 1,
                purged: 0,
                failed: 0,
            }
        );
        let stored = m.store().load(&sku("a")).await.unwrap().unwrap();
        assert_eq!(stored.reserved_stock(), 0);
        assert_eq!(
            m.get_reservation(lapsed.id).await.unwrap().status,
            ReservationStatus::Expired
        );

        assert_eq!(
            m.get_reservation(live.id).await.unwrap().status,
            ReservationStatus::Pending
        );

        // Two days on: b's hold lapsed an hour in, so both are past retention.
        clock.advance(Duration::days(2));
        let report = m.sweep_expired().await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.purged, 2);
        for id in [lapsed.id, live.id] {
            assert_eq!(m.get_reservation(id).await.unwrap_err().kind(), "not_found");
        }
        assert_eq!(m.get_stock(&sku("b")).await.unwrap(), levels(5, 0));
    }

    #[tokio::test]
    async fn out_of_range_durations_fail_cleanly() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let huge = Duration::seconds(100_000_000_000_000);
        let m = ReservationManager::with_clock(
            InMemoryStockStore::new(),
            clock.clone(),
            ReservationPolicy {
                max_ttl: huge,
                purge_retention: huge,
                ..ReservationPolicy::default()
            },
        );
        m.register_product(sku("p"), 10).await.unwrap();

        let err = m
            .reserve(&sku("p"), 1, Some(50_000_000_000_000))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert_eq!(m.get_stock(&sku("p")).await.unwrap(), levels(10, 0));

        let r = m.reserve(&sku("p"), 2, Some(10)).await.unwrap();
        m.release(r.id).await.unwrap();
        clock.advance(Duration::days(365));
        let report = m.sweep_expired().await.unwrap();
        assert_eq!(report.purged, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(
            m.get_reservation(r.id).await.unwrap().status,
            ReservationStatus::Released
        );
    }

    /// Store whose write guard is unobtainable for one product.
    struct BrokenProductStore {
        inner: InMemoryStockStore,
        broken: ProductId,
    }

    #[async_trait::async_trait]
    impl StockStore for BrokenProductStore {
        async fn insert(&self, stock: ProductStock) -> Result<bool, StoreError> {
            self.inner.insert(stock).await
        }

        async fn lock(
            &self,
            product_id: &ProductId,
        ) -> Result<Option<Box<dyn crate::store::StockGuard>>, StoreError> {
            if *product_id == self.broken {
                return Err(StoreError::Corrupt("reserved_stock out of range".to_string()));
            }
            self.inner.lock(product_id).await
        }

        async fn load(&self, product_id: &ProductId) -> Result<Option<ProductStock>, StoreError> {
            self.inner.load(product_id).await
        }

        async fn locate(
            &self,
            reservation_id: ReservationId,
        ) -> Result<Option<ProductId>, StoreError> {
            self.inner.locate(reservation_id).await
        }

        async fn product_ids(&self) -> Result<Vec<ProductId>, StoreError> {
            self.inner.product_ids().await
        }
    }

    #[tokio::test]
    async fn sweep_skips_a_failing_product_and_continues() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let m = ReservationManager::with_clock(
            BrokenProductStore {
                inner: InMemoryStockStore::new(),
                broken: sku("a"),
            },
            clock.clone(),
            ReservationPolicy::default(),
        );
        for id in ["a", "b", "c"] {
            m.register_product(sku(id), 5).await.unwrap();
        }
        m.reserve(&sku("b"), 2, Some(10)).await.unwrap();
        m.reserve(&sku("c"), 3, Some(10)).await.unwrap();

        clock.advance(Duration::seconds(30));
        let report = m.sweep_expired().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                products_scanned: 3,
                expired: 2,
                purged: 0,
                failed: 1,
            }
        );
        for id in ["b", "c"] {
            let stored = m.store().load(&sku(id)).await.unwrap().unwrap();
            assert_eq!(stored.reserved_stock(), 0);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn expiry_is_judged_once_the_lock_is_held() {
        let (m, clock) = setup();
        let m = Arc::new(m);
        m.register_product(sku("p"), 5).await.unwrap();
        m.reserve(&sku("p"), 5, Some(60)).await.unwrap();

        let held = m.store().lock(&sku("p")).await.unwrap().unwrap();
        let waiting = {
            let m = m.clone();
            tokio::spawn(async move { m.reserve(&sku("p"), 5, Some(60)).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        // The first hold lapses while the second reserve waits for the lock.
        clock.advance(Duration::seconds(61));
        drop(held);

        let second = waiting.await.unwrap().unwrap();
        assert_eq!(second.created_at, clock.now());
        assert_eq!(m.get_stock(&sku("p")).await.unwrap(), levels(5, 5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reserves_never_oversell() {
        let manager = Arc::new(ReservationManager::new(
            InMemoryStockStore::new(),
            ReservationPolicy::default(),
        ));
        manager.register_product(sku("hot"), 10).await.unwrap();

        let tasks: Vec<_> = (0..25)
            .map(|_| {
                let m = manager.clone();
                tokio::spawn(async move { m.reserve(&sku("hot"), 1, None).await })
            })
            .collect();

        let mut ok = 0;
        let mut insufficient = 0;
        for t in tasks {
            match t.await.unwrap() {
                Ok(_) => ok += 1,
                Err(ReservationError::InsufficientStock { .. }) => insufficient += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(ok, 10);
        assert_eq!(insufficient, 15);
        assert_eq!(manager.get_stock(&sku("hot")).await.unwrap(), levels(10, 10));
    }

    #[test]
    fn domain_errors_map_to_stable_kinds() {
        let cases = [
            (DomainError::validation("x"), "validation_error"),
            (DomainError::invalid_id("x"), "validation_error"),
            (DomainError::not_found("x"), "not_found"),
            (DomainError::insufficient_stock(2, 1), "insufficient_stock"),
            (DomainError::invalid_state("x"), "invalid_state"),
            (DomainError::conflict("x"), "conflict"),
            (DomainError::invariant("x"), "store_unavailable"),
        ];
        for (err, kind) in cases {
            assert_eq!(ReservationError::from(err).kind(), kind);
        }
    }
}
