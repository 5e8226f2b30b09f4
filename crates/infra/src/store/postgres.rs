//! Postgres-backed stock store.
//!
//! ## Serialization
//!
//! Each write guard owns one transaction. The product row is read with
//! `SELECT ... FOR UPDATE`, so concurrent guards for the same product queue on
//! the row lock while other products proceed. The transaction commits in
//! [`StockGuard::save`]; dropping the guard rolls it back.
//!
//! ## Error Mapping
//!
//! | SQLx error | PostgreSQL code | `StoreError` |
//! |------------|-----------------|--------------|
//! | Database (check / foreign key violation) | `23514` / `23503` | `Corrupt` |
//! | Database (other) | any | `Unavailable` |
//! | PoolClosed, PoolTimedOut, Io, Tls, other | N/A | `Unavailable` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use stockhold_core::{ProductId, ReservationId};
use stockhold_inventory::{InventoryEvent, ProductStock, Reservation, ReservationStatus};

use super::{StockGuard, StockStore, StoreError};

/// Schema applied by [`PostgresStockStore::ensure_schema`].
pub const SCHEMA: &str = include_str!("../../migrations/0001_inventory.sql");

/// Postgres-backed store: `product_stock` rows plus `reservations` rows.
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    /// Create a new store on an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect a pool to `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ping", e))?;
        Ok(())
    }

    #[instrument(skip(self, stock), fields(product_id = %stock.product_id()), err)]
    async fn insert_product(&self, stock: ProductStock) -> Result<bool, StoreError> {
        let mut tx = self.begin("insert_product").await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO product_stock (product_id, total_stock, reserved_stock, version)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (product_id) DO NOTHING
            "#,
        )
        .bind(stock.product_id().as_str())
        .bind(stock.total_stock())
        .bind(stock.reserved_stock())
        .bind(version_to_db(&stock)?)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;

        if inserted.rows_affected() == 0 {
            return Ok(false);
        }

        for r in stock.reservations() {
            insert_reservation(&mut tx, r).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("insert_product", e))?;
        Ok(true)
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn lock_product(
        &self,
        product_id: &ProductId,
    ) -> Result<Option<PostgresStockGuard>, StoreError> {
        let mut tx = self.begin("lock_product").await?;
        let stock = read_stock(&mut tx, product_id, true).await?;
        Ok(stock.map(|stock| PostgresStockGuard { tx, stock }))
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn load_product(&self, product_id: &ProductId) -> Result<Option<ProductStock>, StoreError> {
        let mut tx = self.begin("load_product").await?;

        // Both tables read from one snapshot.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("load_product", e))?;

        let stock = read_stock(&mut tx, product_id, false).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("load_product", e))?;
        Ok(stock)
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

#[async_trait]
impl StockStore for PostgresStockStore {
    async fn insert(&self, stock: ProductStock) -> Result<bool, StoreError> {
        self.insert_product(stock).await
    }

    async fn lock(
        &self,
        product_id: &ProductId,
    ) -> Result<Option<Box<dyn StockGuard>>, StoreError> {
        let guard = self.lock_product(product_id).await?;
        Ok(guard.map(|g| Box::new(g) as Box<dyn StockGuard>))
    }

    async fn load(&self, product_id: &ProductId) -> Result<Option<ProductStock>, StoreError> {
        self.load_product(product_id).await
    }

    async fn locate(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<ProductId>, StoreError> {
        let row = sqlx::query("SELECT product_id FROM reservations WHERE reservation_id = $1")
            .bind(reservation_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("locate", e))?;

        match row {
            Some(row) => {
                let raw: String = row
                    .try_get("product_id")
                    .map_err(|e| map_sqlx_error("locate", e))?;
                let product_id =
                    ProductId::parse(raw).map_err(|e| StoreError::Corrupt(e.to_string()))?;
                Ok(Some(product_id))
            }
            None => Ok(None),
        }
    }

    async fn product_ids(&self) -> Result<Vec<ProductId>, StoreError> {
        let rows = sqlx::query("SELECT product_id FROM product_stock ORDER BY product_id")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("product_ids", e))?;

        rows.iter()
            .map(|row| {
                let raw: String = row
                    .try_get("product_id")
                    .map_err(|e| map_sqlx_error("product_ids", e))?;
                ProductId::parse(raw).map_err(|e| StoreError::Corrupt(e.to_string()))
            })
            .collect()
    }
}

/// Write guard backed by an open transaction holding the product row lock.
struct PostgresStockGuard {
    tx: Transaction<'static, Postgres>,
    stock: ProductStock,
}

#[async_trait]
impl StockGuard for PostgresStockGuard {
    fn stock(&self) -> &ProductStock {
        &self.stock
    }

    async fn save(
        self: Box<Self>,
        stock: ProductStock,
        events: &[InventoryEvent],
    ) -> Result<(), StoreError> {
        let PostgresStockGuard { mut tx, .. } = *self;

        sqlx::query(
            r#"
            UPDATE product_stock
            SET total_stock = $2,
                reserved_stock = $3,
                version = $4,
                updated_at = NOW()
            WHERE product_id = $1
            "#,
        )
        .bind(stock.product_id().as_str())
        .bind(stock.total_stock())
        .bind(stock.reserved_stock())
        .bind(version_to_db(&stock)?)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("save", e))?;

        for event in events {
            match event {
                InventoryEvent::StockReserved(e) => {
                    if let Some(r) = stock.reservation(&e.reservation_id) {
                        insert_reservation(&mut tx, r).await?;
                    }
                }
                InventoryEvent::ReservationReleased(e)
                | InventoryEvent::ReservationCommitted(e)
                | InventoryEvent::ReservationExpired(e) => {
                    if let Some(r) = stock.reservation(&e.reservation_id) {
                        sqlx::query(
                            "UPDATE reservations SET status = $2, resolved_at = $3 WHERE reservation_id = $1",
                        )
                        .bind(r.id.as_uuid())
                        .bind(r.status.as_str())
                        .bind(r.resolved_at)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_sqlx_error("save", e))?;
                    }
                }
                InventoryEvent::ReservationsPurged(e) => {
                    let ids: Vec<Uuid> = e.reservation_ids.iter().map(|id| *id.as_uuid()).collect();
                    sqlx::query("DELETE FROM reservations WHERE reservation_id = ANY($1)")
                        .bind(ids)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_sqlx_error("save", e))?;
                }
                InventoryEvent::ProductRegistered(_) | InventoryEvent::StockReceived(_) => {}
            }
        }

        tx.commit().await.map_err(|e| map_sqlx_error("save", e))
    }
}

async fn read_stock(
    conn: &mut PgConnection,
    product_id: &ProductId,
    for_update: bool,
) -> Result<Option<ProductStock>, StoreError> {
    let sql = if for_update {
        "SELECT total_stock, reserved_stock, version FROM product_stock WHERE product_id = $1 FOR UPDATE"
    } else {
        "SELECT total_stock, reserved_stock, version FROM product_stock WHERE product_id = $1"
    };

    let Some(row) = sqlx::query(sql)
        .bind(product_id.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("read_stock", e))?
    else {
        return Ok(None);
    };

    let total_stock: i64 = row
        .try_get("total_stock")
        .map_err(|e| map_sqlx_error("read_stock", e))?;
    let reserved_stock: i64 = row
        .try_get("reserved_stock")
        .map_err(|e| map_sqlx_error("read_stock", e))?;
    let version: i64 = row
        .try_get("version")
        .map_err(|e| map_sqlx_error("read_stock", e))?;
    let version = u64::try_from(version)
        .map_err(|_| StoreError::Corrupt(format!("negative version {version}")))?;

    let rows = sqlx::query(
        r#"
        SELECT reservation_id, quantity, status, created_at, expires_at, resolved_at
        FROM reservations
        WHERE product_id = $1
        "#,
    )
    .bind(product_id.as_str())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("read_stock", e))?;

    let reservations = rows
        .iter()
        .map(|row| reservation_from_row(product_id, row))
        .collect::<Result<Vec<_>, _>>()?;

    ProductStock::restore(
        product_id.clone(),
        total_stock,
        reserved_stock,
        version,
        reservations,
    )
    .map(Some)
    .map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn reservation_from_row(product_id: &ProductId, row: &PgRow) -> Result<Reservation, StoreError> {
    let map = |e| map_sqlx_error("reservation_from_row", e);

    let id: Uuid = row.try_get("reservation_id").map_err(map)?;
    let status: String = row.try_get("status").map_err(map)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(map)?;
    let expires_at: DateTime<Utc> = row.try_get("expires_at").map_err(map)?;
    let resolved_at: Option<DateTime<Utc>> = row.try_get("resolved_at").map_err(map)?;

    Ok(Reservation {
        id: ReservationId::from_uuid(id),
        product_id: product_id.clone(),
        quantity: row.try_get("quantity").map_err(map)?,
        status: status
            .parse::<ReservationStatus>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        created_at,
        expires_at,
        resolved_at,
    })
}

async fn insert_reservation(conn: &mut PgConnection, r: &Reservation) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO reservations (
            reservation_id, product_id, quantity, status, created_at, expires_at, resolved_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(r.id.as_uuid())
    .bind(r.product_id.as_str())
    .bind(r.quantity)
    .bind(r.status.as_str())
    .bind(r.created_at)
    .bind(r.expires_at)
    .bind(r.resolved_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_reservation", e))?;
    Ok(())
}

fn version_to_db(stock: &ProductStock) -> Result<i64, StoreError> {
    use stockhold_core::AggregateRoot;

    i64::try_from(stock.version())
        .map_err(|_| StoreError::Corrupt("version exceeds BIGINT".to_string()))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Check constraint / foreign key violation: rows would break an invariant.
                Some("23514") | Some("23503") => StoreError::Corrupt(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool timed out in {operation}"))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}
