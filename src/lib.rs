use std::sync::Arc;

use redis::Client as RedisClient;
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;

use config::{Config, StoreBackend};
use coordinator::EmergencyCoordinator;
use error::CoordError;
use notify::{LogDispatcher, NotificationDispatcher, WebhookDispatcher};
use routing::OsrmClient;
use store::{
    EmergencyStore, MemoryEmergencyStore, MemoryPresenceStore, PgEmergencyStore, PresenceStore,
    RedisPresenceStore,
};

pub mod config;
pub mod coordinator;
pub mod error;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod proximity;
pub mod router;
pub mod routes;
pub mod routing;
pub mod session;
pub mod store;
pub mod utils;
pub mod visibility;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub coordinator: Arc<EmergencyCoordinator>,
    pub presence: Arc<dyn PresenceStore>,
    pub emergencies: Arc<dyn EmergencyStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        presence: Arc<dyn PresenceStore>,
        emergencies: Arc<dyn EmergencyStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let coordinator =
            EmergencyCoordinator::new(presence.clone(), emergencies.clone(), dispatcher);
        Self::with_coordinator(config, coordinator, presence, emergencies)
    }

    fn with_coordinator(
        config: Config,
        coordinator: EmergencyCoordinator,
        presence: Arc<dyn PresenceStore>,
        emergencies: Arc<dyn EmergencyStore>,
    ) -> Self {
        Self {
            config,
            coordinator: Arc::new(coordinator),
            presence,
            emergencies,
        }
    }

    /// Everything in process; used by tests and `STORE_BACKEND=memory`.
    pub fn in_memory(config: Config) -> Self {
        Self::new(
            config,
            Arc::new(MemoryPresenceStore::new()),
            Arc::new(MemoryEmergencyStore::new()),
            Arc::new(LogDispatcher),
        )
    }

    pub async fn from_config(config: Config) -> Result<Self, CoordError> {
        let presence: Arc<dyn PresenceStore> = match config.store_backend {
            StoreBackend::Memory => Arc::new(MemoryPresenceStore::new()),
            StoreBackend::Redis => {
                let url = config.redis_url.clone().ok_or_else(|| {
                    CoordError::Validation("REDIS_URL is required for the redis backend".into())
                })?;
                let client = RedisClient::open(url)?;
                Arc::new(RedisPresenceStore::new(Arc::new(client)))
            }
        };

        let emergencies: Arc<dyn EmergencyStore> = match &config.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(10)
                    .after_connect(|conn, _meta| {
                        Box::pin(async move {
                            conn.execute("SET application_name = 'beacon_backend';")
                                .await?;
                            Ok(())
                        })
                    })
                    .connect(url)
                    .await?;
                let store = PgEmergencyStore::new(pool);
                store.migrate().await?;
                Arc::new(store)
            }
            None => Arc::new(MemoryEmergencyStore::new()),
        };

        let dispatcher: Arc<dyn NotificationDispatcher> = match &config.notify_webhook_url {
            Some(url) => Arc::new(WebhookDispatcher::new(url.clone(), config.http_timeout())?),
            None => Arc::new(LogDispatcher),
        };

        let mut coordinator =
            EmergencyCoordinator::new(presence.clone(), emergencies.clone(), dispatcher);
        if let Some(url) = &config.routing_url {
            let routing = OsrmClient::new(url.clone(), config.http_timeout())?;
            coordinator = coordinator.with_routing(Arc::new(routing));
        }

        Ok(Self::with_coordinator(config, coordinator, presence, emergencies))
    }
}
