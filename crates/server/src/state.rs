//! Shared application state handed to every handler.

use std::sync::Arc;

use etebase_blob::ChunkStore;
use sqlx::SqlitePool;

use crate::broker::Broker;
use crate::config::Config;
use crate::db;
use crate::services::{
    AuthService, ChunkService, CollectionService, InvitationService, ItemService, MemberService,
};
use crate::tickets::TicketStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub auth: AuthService,
    pub collections: CollectionService,
    pub items: ItemService,
    pub chunks: ChunkService,
    pub members: MemberService,
    pub invitations: InvitationService,
    pub tickets: Arc<TicketStore>,
    pub broker: Arc<Broker>,
}

impl AppState {
    /// Wire everything up from a loaded config: database pool, chunk
    /// store, broker and ticket store (Redis-backed when configured,
    /// process-local otherwise), and the services on top of them.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config.database_url).await?;

        tokio::fs::create_dir_all(&config.chunk_storage_path).await?;
        let store = ChunkStore::new(&config.chunk_storage_path);

        let (broker, tickets) = match &config.redis_url {
            Some(url) => {
                let broker = Broker::redis(url).await?;
                let client = redis::Client::open(url.as_str())?;
                let conn = client.get_multiplexed_async_connection().await?;
                tracing::info!("redis broker and ticket store connected");
                (broker, TicketStore::redis(conn))
            }
            None => {
                tracing::info!("no REDIS_URL; using in-process broker and ticket store");
                (Broker::local(), TicketStore::local())
            }
        };

        Ok(Self::assemble(Arc::new(config), pool, store, broker, tickets))
    }

    /// Assembly from parts; the test suites use this with a temp database
    /// and the local broker.
    pub fn assemble(
        config: Arc<Config>,
        pool: SqlitePool,
        store: ChunkStore,
        broker: Broker,
        tickets: TicketStore,
    ) -> Self {
        let broker = Arc::new(broker);
        Self {
            auth: AuthService::new(pool.clone(), config.clone()),
            collections: CollectionService::new(pool.clone(), broker.clone()),
            items: ItemService::new(pool.clone(), broker.clone()),
            chunks: ChunkService::new(pool.clone(), store),
            members: MemberService::new(pool.clone()),
            invitations: InvitationService::new(pool.clone()),
            tickets: Arc::new(tickets),
            broker,
            config,
            pool,
        }
    }
}
