use crate::config::AppConfig;
use crate::db::connection::DbPool;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    /// Serializes pipeline phases within this process. The advisory file
    /// lock in `services::lock` covers other processes on the same host.
    pub update_guard: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        Self {
            db,
            config,
            update_guard: Arc::new(Mutex::new(())),
        }
    }
}
