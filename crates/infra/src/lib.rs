//! Infrastructure layer: stores, configuration, orchestration and the
//! background expiry sweeper.

pub mod clock;
pub mod config;
pub mod manager;
pub mod store;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigError};
pub use manager::{ReservationError, ReservationManager, ReservationPolicy, SweepReport};
pub use store::{InMemoryStockStore, PostgresStockStore, StockGuard, StockStore, StoreError};
pub use sweeper::{ExpirySweeper, ExpirySweeperHandle};
