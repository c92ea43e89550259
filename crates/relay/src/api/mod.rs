pub mod commits;
pub mod locks;
pub mod members;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use teamgraph_coord::clock::SystemClock;
use teamgraph_coord::notify::TracingSink;
use teamgraph_coord::store::postgres::PoolConfig;
use teamgraph_coord::store::{GraphBackend, MemoryGraphStore, PgGraphStore};
use teamgraph_coord::Collaboration;
use tracing::{info, warn};

use crate::config::RelayConfig;

pub type Coordinator = Collaboration<GraphBackend>;

#[derive(Clone)]
pub struct ApiState {
    collab: Arc<Coordinator>,
}

impl ApiState {
    pub fn new(collab: Arc<Coordinator>) -> Self {
        Self { collab }
    }
}

/// Build the `/v1` API against the graph store selected by `config`.
pub async fn build_router_from_config(config: &RelayConfig) -> Result<Router> {
    let coord_config = config.load_coord_config()?;
    let backend = match config.database_url.as_deref() {
        Some(database_url) => {
            let store = PgGraphStore::connect(database_url, PoolConfig::default())
                .await
                .context("failed to initialize graph store")?;
            info!("using postgres graph store");
            GraphBackend::Postgres(store)
        }
        None => {
            warn!("TEAMGRAPH_RELAY_DATABASE_URL is not set; using in-memory graph store");
            GraphBackend::Memory(Arc::new(MemoryGraphStore::new()))
        }
    };

    let collab = Collaboration::new(
        Arc::new(backend),
        coord_config,
        Arc::new(SystemClock),
        Arc::new(TracingSink),
    );
    Ok(router(Arc::new(collab)))
}

pub fn router(collab: Arc<Coordinator>) -> Router {
    Router::new()
        .merge(locks::routes())
        .merge(commits::routes())
        .merge(members::routes())
        .with_state(ApiState::new(collab))
}
