use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockhold_core::{Aggregate, AggregateRoot, DomainError, DomainResult, ProductId, ReservationId};

use crate::reservation::{Reservation, ReservationStatus};

/// Point-in-time stock figures for a product, as reported to callers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockLevels {
    pub total_stock: i64,
    pub reserved_stock: i64,
    pub available_stock: i64,
}

/// Aggregate root: the stock record of one product plus the reservations held
/// against it.
///
/// `reserved_stock` is the stored counter and always equals the sum of the
/// quantities of reservations stored as `Pending`. Holds whose expiry passed
/// but that were not yet materialized still sit in that counter; every read
/// goes through [`ProductStock::levels`], which only counts live holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductStock {
    product_id: ProductId,
    total_stock: i64,
    reserved_stock: i64,
    reservations: BTreeMap<ReservationId, Reservation>,
    version: u64,
    created: bool,
}

impl ProductStock {
    /// Create an empty, not-yet-registered aggregate instance.
    pub fn empty(product_id: ProductId) -> Self {
        Self {
            product_id,
            total_stock: 0,
            reserved_stock: 0,
            reservations: BTreeMap::new(),
            version: 0,
            created: false,
        }
    }

    /// Rebuild a registered aggregate from persisted state.
    ///
    /// Fails with `InvariantViolation` if the rows do not describe a
    /// consistent stock record.
    pub fn restore(
        product_id: ProductId,
        total_stock: i64,
        reserved_stock: i64,
        version: u64,
        reservations: impl IntoIterator<Item = Reservation>,
    ) -> DomainResult<Self> {
        let stock = Self {
            reservations: reservations.into_iter().map(|r| (r.id, r)).collect(),
            product_id,
            total_stock,
            reserved_stock,
            version,
            created: true,
        };
        stock.check_invariants()?;
        Ok(stock)
    }

    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn total_stock(&self) -> i64 {
        self.total_stock
    }

    /// Stored reserved counter (includes lapsed-but-unmaterialized holds).
    pub fn reserved_stock(&self) -> i64 {
        self.reserved_stock
    }

    pub fn reservation(&self, id: &ReservationId) -> Option<&Reservation> {
        self.reservations.get(id)
    }

    pub fn reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.values()
    }

    /// Quantity held by reservations that are still live at `now`.
    pub fn effective_reserved(&self, now: DateTime<Utc>) -> i64 {
        self.reservations
            .values()
            .filter(|r| r.is_holding(now))
            .map(|r| r.quantity)
            .sum()
    }

    /// Stock figures as observed at `now` (lazy expiry applied).
    pub fn levels(&self, now: DateTime<Utc>) -> StockLevels {
        let reserved = self.effective_reserved(now);
        StockLevels {
            total_stock: self.total_stock,
            reserved_stock: reserved,
            available_stock: self.total_stock - reserved,
        }
    }

    /// Verify `0 <= reserved <= total` and that the counter matches the
    /// pending reservations.
    pub fn check_invariants(&self) -> DomainResult<()> {
        if self.total_stock < 0 {
            return Err(DomainError::invariant("total stock is negative"));
        }
        if self.reserved_stock < 0 || self.reserved_stock > self.total_stock {
            return Err(DomainError::invariant(format!(
                "reserved stock {} outside [0, {}]",
                self.reserved_stock, self.total_stock
            )));
        }
        let mut pending = 0i64;
        for r in self.reservations.values() {
            if r.product_id != self.product_id {
                return Err(DomainError::invariant(format!(
                    "reservation {} belongs to another product",
                    r.id
                )));
            }
            if r.quantity <= 0 {
                return Err(DomainError::invariant(format!(
                    "reservation {} has non-positive quantity",
                    r.id
                )));
            }
            if r.status == ReservationStatus::Pending {
                pending += r.quantity;
            }
        }
        if pending != self.reserved_stock {
            return Err(DomainError::invariant(format!(
                "reserved stock {} does not match pending holds {pending}",
                self.reserved_stock
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for ProductStock {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.product_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterProduct {
    pub product_id: ProductId,
    pub total_stock: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveStock (goods in).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub product_id: ProductId,
    pub reservation_id: ReservationId,
    pub quantity: i64,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseReservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReservation {
    pub product_id: ProductId,
    pub reservation_id: ReservationId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CommitReservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReservation {
    pub product_id: ProductId,
    pub reservation_id: ReservationId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ExpireReservations (materialize lapsed holds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireReservations {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PurgeReservations (drop terminal holds resolved before a cutoff).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReservations {
    pub product_id: ProductId,
    pub resolved_before: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryCommand {
    RegisterProduct(RegisterProduct),
    ReceiveStock(ReceiveStock),
    ReserveStock(ReserveStock),
    ReleaseReservation(ReleaseReservation),
    CommitReservation(CommitReservation),
    ExpireReservations(ExpireReservations),
    PurgeReservations(PurgeReservations),
}

/// Event: ProductRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRegistered {
    pub product_id: ProductId,
    pub total_stock: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReceived {
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub product_id: ProductId,
    pub reservation_id: ReservationId,
    pub quantity: i64,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event shared by the three transitions out of `Pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationResolved {
    pub product_id: ProductId,
    pub reservation_id: ReservationId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReservationsPurged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationsPurged {
    pub product_id: ProductId,
    pub reservation_ids: Vec<ReservationId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    ProductRegistered(ProductRegistered),
    StockReceived(StockReceived),
    StockReserved(StockReserved),
    ReservationReleased(ReservationResolved),
    ReservationCommitted(ReservationResolved),
    ReservationExpired(ReservationResolved),
    ReservationsPurged(ReservationsPurged),
}

impl InventoryEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::ProductRegistered(_) => "inventory.product.registered",
            InventoryEvent::StockReceived(_) => "inventory.stock.received",
            InventoryEvent::StockReserved(_) => "inventory.stock.reserved",
            InventoryEvent::ReservationReleased(_) => "inventory.reservation.released",
            InventoryEvent::ReservationCommitted(_) => "inventory.reservation.committed",
            InventoryEvent::ReservationExpired(_) => "inventory.reservation.expired",
            InventoryEvent::ReservationsPurged(_) => "inventory.reservations.purged",
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::ProductRegistered(e) => e.occurred_at,
            InventoryEvent::StockReceived(e) => e.occurred_at,
            InventoryEvent::StockReserved(e) => e.occurred_at,
            InventoryEvent::ReservationReleased(e)
            | InventoryEvent::ReservationCommitted(e)
            | InventoryEvent::ReservationExpired(e) => e.occurred_at,
            InventoryEvent::ReservationsPurged(e) => e.occurred_at,
        }
    }

    /// The single reservation this event is about, if any.
    pub fn reservation_id(&self) -> Option<ReservationId> {
        match self {
            InventoryEvent::StockReserved(e) => Some(e.reservation_id),
            InventoryEvent::ReservationReleased(e)
            | InventoryEvent::ReservationCommitted(e)
            | InventoryEvent::ReservationExpired(e) => Some(e.reservation_id),
            _ => None,
        }
    }
}

impl Aggregate for ProductStock {
    type Command = InventoryCommand;
    type Event = InventoryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InventoryEvent::ProductRegistered(e) => {
                self.product_id = e.product_id.clone();
                self.total_stock = e.total_stock;
                self.reserved_stock = 0;
                self.reservations.clear();
                self.created = true;
            }
            InventoryEvent::StockReceived(e) => {
                self.total_stock += e.quantity;
            }
            InventoryEvent::StockReserved(e) => {
                self.reserved_stock += e.quantity;
                self.reservations.insert(
                    e.reservation_id,
                    Reservation {
                        id: e.reservation_id,
                        product_id: e.product_id.clone(),
                        quantity: e.quantity,
                        status: ReservationStatus::Pending,
                        created_at: e.occurred_at,
                        expires_at: e.expires_at,
                        resolved_at: None,
                    },
                );
            }
            InventoryEvent::ReservationReleased(e) => {
                self.resolve(e, ReservationStatus::Released);
            }
            InventoryEvent::ReservationCommitted(e) => {
                self.resolve(e, ReservationStatus::Committed);
                self.total_stock -= e.quantity;
            }
            InventoryEvent::ReservationExpired(e) => {
                self.resolve(e, ReservationStatus::Expired);
            }
            InventoryEvent::ReservationsPurged(e) => {
                for id in &e.reservation_ids {
                    self.reservations.remove(id);
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InventoryCommand::RegisterProduct(cmd) => self.handle_register(cmd),
            InventoryCommand::ReceiveStock(cmd) => self.handle_receive(cmd),
            InventoryCommand::ReserveStock(cmd) => self.handle_reserve(cmd),
            InventoryCommand::ReleaseReservation(cmd) => self.handle_release(cmd),
            InventoryCommand::CommitReservation(cmd) => self.handle_commit(cmd),
            InventoryCommand::ExpireReservations(cmd) => self.handle_expire(cmd),
            InventoryCommand::PurgeReservations(cmd) => self.handle_purge(cmd),
        }
    }
}

impl ProductStock {
    fn resolve(&mut self, e: &ReservationResolved, status: ReservationStatus) {
        self.reserved_stock -= e.quantity;
        if let Some(r) = self.reservations.get_mut(&e.reservation_id) {
            r.status = status;
            r.resolved_at = Some(e.occurred_at);
        }
    }

    fn ensure_product(&self, product_id: &ProductId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("product '{product_id}'")));
        }
        if &self.product_id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn find(&self, id: ReservationId) -> Result<&Reservation, DomainError> {
        self.reservations
            .get(&id)
            .ok_or_else(|| DomainError::not_found(format!("reservation {id}")))
    }

    /// Expiry events for every hold that lapsed by `now`.
    ///
    /// Mutating commands prepend these so the stored counter converges with
    /// what readers already observe. An expiry is dated at `expires_at`, not
    /// at the moment it was materialized.
    fn expire_lapsed(&self, now: DateTime<Utc>) -> Vec<InventoryEvent> {
        self.reservations
            .values()
            .filter(|r| r.is_lapsed(now))
            .map(|r| {
                InventoryEvent::ReservationExpired(ReservationResolved {
                    product_id: self.product_id.clone(),
                    reservation_id: r.id,
                    quantity: r.quantity,
                    occurred_at: r.expires_at,
                })
            })
            .collect()
    }

    fn handle_register(&self, cmd: &RegisterProduct) -> Result<Vec<InventoryEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "product '{}' already exists",
                cmd.product_id
            )));
        }
        if self.product_id != cmd.product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        if cmd.total_stock < 0 {
            return Err(DomainError::validation("totalStock cannot be negative"));
        }
        Ok(vec![InventoryEvent::ProductRegistered(ProductRegistered {
            product_id: cmd.product_id.clone(),
            total_stock: cmd.total_stock,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceiveStock) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_product(&cmd.product_id)?;
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be a positive integer"));
        }
        if self.total_stock.checked_add(cmd.quantity).is_none() {
            return Err(DomainError::validation("total stock would overflow"));
        }

        let mut events = self.expire_lapsed(cmd.occurred_at);
        events.push(InventoryEvent::StockReceived(StockReceived {
            product_id: cmd.product_id.clone(),
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        }));
        Ok(events)
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_product(&cmd.product_id)?;
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be a positive integer"));
        }
        if cmd.expires_at <= cmd.occurred_at {
            return Err(DomainError::validation("expiry must be after creation"));
        }
        if self.reservations.contains_key(&cmd.reservation_id) {
            return Err(DomainError::conflict(format!(
                "reservation {} already exists",
                cmd.reservation_id
            )));
        }

        let available = self.levels(cmd.occurred_at).available_stock;
        if cmd.quantity > available {
            return Err(DomainError::insufficient_stock(cmd.quantity, available));
        }

        let mut events = self.expire_lapsed(cmd.occurred_at);
        events.push(InventoryEvent::StockReserved(StockReserved {
            product_id: cmd.product_id.clone(),
            reservation_id: cmd.reservation_id,
            quantity: cmd.quantity,
            expires_at: cmd.expires_at,
            occurred_at: cmd.occurred_at,
        }));
        Ok(events)
    }

    fn handle_release(
        &self,
        cmd: &ReleaseReservation,
    ) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_product(&cmd.product_id)?;
        let reservation = self.find(cmd.reservation_id)?;

        // Releasing a resolved (or lapsed) hold is a no-op beyond expiry
        // materialization; the caller reports the resulting status.
        let mut events = self.expire_lapsed(cmd.occurred_at);
        if reservation.is_holding(cmd.occurred_at) {
            events.push(InventoryEvent::ReservationReleased(ReservationResolved {
                product_id: cmd.product_id.clone(),
                reservation_id: cmd.reservation_id,
                quantity: reservation.quantity,
                occurred_at: cmd.occurred_at,
            }));
        }
        Ok(events)
    }

    fn handle_commit(&self, cmd: &CommitReservation) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_product(&cmd.product_id)?;
        let reservation = self.find(cmd.reservation_id)?;

        let status = reservation.effective_status(cmd.occurred_at);
        if status != ReservationStatus::Pending {
            return Err(DomainError::invalid_state(format!(
                "reservation {} is {status}, expected PENDING",
                cmd.reservation_id
            )));
        }

        let mut events = self.expire_lapsed(cmd.occurred_at);
        events.push(InventoryEvent::ReservationCommitted(ReservationResolved {
            product_id: cmd.product_id.clone(),
            reservation_id: cmd.reservation_id,
            quantity: reservation.quantity,
            occurred_at: cmd.occurred_at,
        }));
        Ok(events)
    }

    fn handle_expire(
        &self,
        cmd: &ExpireReservations,
    ) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_product(&cmd.product_id)?;
        Ok(self.expire_lapsed(cmd.occurred_at))
    }

    fn handle_purge(&self, cmd: &PurgeReservations) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_product(&cmd.product_id)?;
        let reservation_ids: Vec<ReservationId> = self
            .reservations
            .values()
            .filter(|r| r.status.is_terminal())
            .filter(|r| r.resolved_at.is_some_and(|at| at < cmd.resolved_before))
            .map(|r| r.id)
            .collect();

        if reservation_ids.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![InventoryEvent::ReservationsPurged(ReservationsPurged {
            product_id: cmd.product_id.clone(),
            reservation_ids,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn sku() -> ProductId {
        ProductId::parse("sku-100").unwrap()
    }

    fn run(stock: &mut ProductStock, cmd: InventoryCommand) -> DomainResult<Vec<InventoryEvent>> {
        let events = stock.handle(&cmd)?;
        for e in &events {
            stock.apply(e);
        }
        stock.check_invariants()?;
        Ok(events)
    }

    fn registered(total: i64) -> ProductStock {
        let mut stock = ProductStock::empty(sku());
        run(
            &mut stock,
            InventoryCommand::RegisterProduct(RegisterProduct {
                product_id: sku(),
                total_stock: total,
                occurred_at: t0(),
            }),
        )
        .unwrap();
        stock
    }

    fn reserve_cmd(quantity: i64, at: DateTime<Utc>, ttl: Duration) -> (ReservationId, InventoryCommand) {
        let id = ReservationId::new();
        let cmd = InventoryCommand::ReserveStock(ReserveStock {
            product_id: sku(),
            reservation_id: id,
            quantity,
            expires_at: at + ttl,
            occurred_at: at,
        });
        (id, cmd)
    }

    fn release_cmd(id: ReservationId, at: DateTime<Utc>) -> InventoryCommand {
        InventoryCommand::ReleaseReservation(ReleaseReservation {
            product_id: sku(),
            reservation_id: id,
            occurred_at: at,
        })
    }

    fn commit_cmd(id: ReservationId, at: DateTime<Utc>) -> InventoryCommand {
        InventoryCommand::CommitReservation(CommitReservation {
            product_id: sku(),
            reservation_id: id,
            occurred_at: at,
        })
    }

    #[test]
    fn reserve_then_release_scenario() {
        let mut stock = registered(10);
        let ttl = Duration::minutes(15);

        let (first, cmd) = reserve_cmd(7, t0(), ttl);
        run(&mut stock, cmd).unwrap();
        assert_eq!(
            stock.levels(t0()),
            StockLevels {
                total_stock: 10,
                reserved_stock: 7,
                available_stock: 3
            }
        );

        let (_, cmd) = reserve_cmd(5, t0(), ttl);
        let err = run(&mut stock, cmd).unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock(5, 3));

        run(&mut stock, release_cmd(first, t0())).unwrap();
        assert_eq!(stock.levels(t0()).reserved_stock, 0);
        assert_eq!(stock.levels(t0()).available_stock, 10);
    }

    #[test]
    fn release_is_idempotent() {
        let mut stock = registered(10);
        let (id, cmd) = reserve_cmd(4, t0(), Duration::minutes(5));
        run(&mut stock, cmd).unwrap();

        let first = run(&mut stock, release_cmd(id, t0())).unwrap();
        assert_eq!(first.len(), 1);
        let second = run(&mut stock, release_cmd(id, t0())).unwrap();
        assert!(second.is_empty());

        assert_eq!(stock.reserved_stock(), 0);
        assert_eq!(stock.total_stock(), 10);
        assert_eq!(
            stock.reservation(&id).unwrap().status,
            ReservationStatus::Released
        );
    }

    #[test]
    fn commit_deducts_total_and_reserved_together() {
        let mut stock = registered(10);
        let (id, cmd) = reserve_cmd(6, t0(), Duration::minutes(5));
        run(&mut stock, cmd).unwrap();
        let before = stock.levels(t0());

        run(&mut stock, commit_cmd(id, t0())).unwrap();
        let after = stock.levels(t0());

        assert_eq!(after.total_stock, before.total_stock - 6);
        assert_eq!(after.reserved_stock, 0);
        assert_eq!(after.available_stock, before.available_stock);
    }

    #[test]
    fn commit_requires_a_pending_hold() {
        let mut stock = registered(10);
        let (id, cmd) = reserve_cmd(2, t0(), Duration::minutes(5));
        run(&mut stock, cmd).unwrap();
        run(&mut stock, release_cmd(id, t0())).unwrap();

        let err = run(&mut stock, commit_cmd(id, t0())).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        let err = run(&mut stock, commit_cmd(ReservationId::new(), t0())).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn lapsed_hold_stops_counting_without_a_sweep() {
        let mut stock = registered(10);
        let (id, cmd) = reserve_cmd(8, t0(), Duration::minutes(1));
        run(&mut stock, cmd).unwrap();

        let later = t0() + Duration::minutes(2);
        assert_eq!(stock.levels(later).available_stock, 10);
        // Stored counter is untouched until a write materializes the expiry.
        assert_eq!(stock.reserved_stock(), 8);

        let (_, cmd) = reserve_cmd(9, later, Duration::minutes(1));
        let events = run(&mut stock, cmd).unwrap();
        assert_eq!(events[0].event_type(), "inventory.reservation.expired");
        assert_eq!(stock.reserved_stock(), 9);
        assert_eq!(
            stock.reservation(&id).unwrap().status,
            ReservationStatus::Expired
        );
    }

    #[test]
    fn committing_a_lapsed_hold_is_rejected() {
        let mut stock = registered(5);
        let (id, cmd) = reserve_cmd(5, t0(), Duration::minutes(1));
        run(&mut stock, cmd).unwrap();

        let err = run(&mut stock, commit_cmd(id, t0() + Duration::minutes(1))).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn releasing_a_lapsed_hold_reports_expired() {
        let mut stock = registered(5);
        let (id, cmd) = reserve_cmd(5, t0(), Duration::minutes(1));
        run(&mut stock, cmd).unwrap();

        run(&mut stock, release_cmd(id, t0() + Duration::minutes(3))).unwrap();
        assert_eq!(
            stock.reservation(&id).unwrap().status,
            ReservationStatus::Expired
        );
        assert_eq!(stock.reserved_stock(), 0);
    }

    #[test]
    fn purge_drops_only_old_terminal_holds() {
        let mut stock = registered(10);
        let (released, cmd) = reserve_cmd(1, t0(), Duration::minutes(5));
        run(&mut stock, cmd).unwrap();
        let (pending, cmd) = reserve_cmd(1, t0(), Duration::hours(5));
        run(&mut stock, cmd).unwrap();
        run(&mut stock, release_cmd(released, t0())).unwrap();

        let events = run(
            &mut stock,
            InventoryCommand::PurgeReservations(PurgeReservations {
                product_id: sku(),
                resolved_before: t0() + Duration::seconds(1),
                occurred_at: t0() + Duration::hours(1),
            }),
        )
        .unwrap();

        assert_eq!(events.len(), 1);
        assert!(stock.reservation(&released).is_none());
        assert!(stock.reservation(&pending).is_some());
    }

    #[test]
    fn register_and_receive_validate_input() {
        let mut stock = ProductStock::empty(sku());
        let err = run(
            &mut stock,
            InventoryCommand::RegisterProduct(RegisterProduct {
                product_id: sku(),
                total_stock: -1,
                occurred_at: t0(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let mut stock = registered(1);
        let err = run(
            &mut stock,
            InventoryCommand::RegisterProduct(RegisterProduct {
                product_id: sku(),
                total_stock: 1,
                occurred_at: t0(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        run(
            &mut stock,
            InventoryCommand::ReceiveStock(ReceiveStock {
                product_id: sku(),
                quantity: 4,
                occurred_at: t0(),
            }),
        )
        .unwrap();
        assert_eq!(stock.total_stock(), 5);
    }

    #[test]
    fn unknown_product_is_not_found() {
        let stock = ProductStock::empty(sku());
        let (_, cmd) = reserve_cmd(1, t0(), Duration::minutes(1));
        assert!(matches!(stock.handle(&cmd), Err(DomainError::NotFound(_))));
    }

    #[test]
    fn restore_rejects_inconsistent_rows() {
        let err = ProductStock::restore(sku(), 5, 6, 1, vec![]).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        let err = ProductStock::restore(sku(), 5, 2, 1, vec![]).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Reserve(i64, i64),
            Release(usize),
            Commit(usize),
            Receive(i64),
            Advance(i64),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (1i64..15, 1i64..120).prop_map(|(q, ttl)| Op::Reserve(q, ttl)),
                (0usize..16).prop_map(Op::Release),
                (0usize..16).prop_map(Op::Commit),
                (1i64..10).prop_map(Op::Receive),
                (1i64..90).prop_map(Op::Advance),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: `0 <= reserved <= total` holds after every command,
            /// for both the stored counter and the effective view.
            #[test]
            fn stock_invariant_holds(initial in 0i64..30, ops in prop::collection::vec(op(), 1..60)) {
                let mut stock = registered(initial);
                let mut now = t0();
                let mut ids: Vec<ReservationId> = Vec::new();

                for op in ops {
                    let cmd = match op {
                        Op::Reserve(q, ttl) => {
                            let (id, cmd) = reserve_cmd(q, now, Duration::seconds(ttl));
                            ids.push(id);
                            cmd
                        }
                        Op::Release(i) if !ids.is_empty() => release_cmd(ids[i % ids.len()], now),
                        Op::Commit(i) if !ids.is_empty() => commit_cmd(ids[i % ids.len()], now),
                        Op::Receive(q) => InventoryCommand::ReceiveStock(ReceiveStock {
                            product_id: sku(),
                            quantity: q,
                            occurred_at: now,
                        }),
                        Op::Advance(secs) => {
                            now += Duration::seconds(secs);
                            continue;
                        }
                        _ => continue,
                    };

                    if let Ok(events) = stock.handle(&cmd) {
                        for e in &events {
                            stock.apply(e);
                        }
                    }

                    prop_assert!(stock.check_invariants().is_ok());
                    let levels = stock.levels(now);
                    prop_assert!(levels.reserved_stock >= 0);
                    prop_assert!(levels.reserved_stock <= levels.total_stock);
                    prop_assert_eq!(levels.available_stock, levels.total_stock - levels.reserved_stock);
                }
            }

            /// Property: reserve followed by release restores availability.
            #[test]
            fn reserve_release_restores_availability(total in 1i64..50, q in 1i64..50) {
                let mut stock = registered(total);
                let before = stock.levels(t0()).available_stock;
                let (id, cmd) = reserve_cmd(q, t0(), Duration::minutes(1));
                if stock.handle(&cmd).is_ok() {
                    run(&mut stock, cmd).unwrap();
                    run(&mut stock, release_cmd(id, t0())).unwrap();
                }
                prop_assert_eq!(stock.levels(t0()).available_stock, before);
            }
        }
    }
}
