//! Store selection and the shared reservation manager.
//!
//! `USE_PERSISTENT_STORES=true` selects Postgres (schema applied on startup);
//! otherwise everything lives in process memory.

use std::sync::Arc;

use tracing::info;

use stockhold_infra::{
    AppConfig, InMemoryStockStore, PostgresStockStore, ReservationManager, ReservationPolicy,
    StockStore, StoreError,
};

/// Store handle shared by the manager and the sweeper.
pub type SharedStockStore = Arc<dyn StockStore>;

/// The manager type every route works against.
pub type Manager = ReservationManager<SharedStockStore>;

pub enum AppServices {
    InMemory {
        manager: Arc<Manager>,
        store: Arc<InMemoryStockStore>,
    },
    Persistent {
        manager: Arc<Manager>,
        store: Arc<PostgresStockStore>,
    },
}

impl AppServices {
    pub fn in_memory(policy: ReservationPolicy) -> Self {
        let store = Arc::new(InMemoryStockStore::new());
        let shared: SharedStockStore = store.clone();
        AppServices::InMemory {
            manager: Arc::new(ReservationManager::new(shared, policy)),
            store,
        }
    }

    pub async fn persistent(
        database_url: &str,
        policy: ReservationPolicy,
    ) -> Result<Self, StoreError> {
        let store = Arc::new(PostgresStockStore::connect(database_url).await?);
        store.ensure_schema().await?;
        let shared: SharedStockStore = store.clone();
        Ok(AppServices::Persistent {
            manager: Arc::new(ReservationManager::new(shared, policy)),
            store,
        })
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self, StoreError> {
        let policy = config.policy();
        let services = match (config.use_persistent_stores, config.database_url.as_deref()) {
            (true, Some(url)) => Self::persistent(url, policy).await?,
            (true, None) => {
                return Err(StoreError::Unavailable(
                    "DATABASE_URL is required for persistent stores".to_string(),
                ));
            }
            (false, _) => Self::in_memory(policy),
        };
        info!(backend = services.backend(), "stock store ready");
        Ok(services)
    }

    pub fn manager(&self) -> &Arc<Manager> {
        match self {
            AppServices::InMemory { manager, .. } | AppServices::Persistent { manager, .. } => {
                manager
            }
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            AppServices::InMemory { .. } => "in_memory",
            AppServices::Persistent { .. } => "postgres",
        }
    }

    /// Cheap liveness probe of the backing store.
    pub async fn check_store(&self) -> Result<(), StoreError> {
        match self {
            AppServices::InMemory { store, .. } => store.product_ids().await.map(|_| ()),
            AppServices::Persistent { store, .. } => store.ping().await,
        }
    }
}
