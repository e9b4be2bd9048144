use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::controller::Controller;
use crate::limiter::{
    ChatLimiter, GlobalLimiter, GLOBAL_RPS, PER_CHAT_DELAY_SECS, PER_CHAT_EDIT_DELAY_SECS,
    PER_GROUP_MSG_DELAY_SECS,
};
use crate::producer::Producer;
use crate::store::{SqliteStreamStore, StreamStore};

/// Construction-time dependency container: owns the stream store, both
/// rate limiters, the producer, and the controller. Built once at startup.
pub struct SystemContext {
    pub store: Arc<dyn StreamStore>,
    pub chat_limiter: Arc<ChatLimiter>,
    pub producer: Arc<Producer>,
    pub controller: Arc<Controller>,
}

impl SystemContext {
    /// Startup-time wiring; uses `anyhow::Result` like the rest of the
    /// process bootstrap, rather than the per-message `DispatchError`.
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let store: Arc<dyn StreamStore> = Arc::new(SqliteStreamStore::new(&config.db_path).await?);
        let global_limiter = Arc::new(GlobalLimiter::new(GLOBAL_RPS));
        let chat_limiter = Arc::new(ChatLimiter::new(
            store.clone(),
            global_limiter,
            Duration::from_secs_f64(PER_CHAT_DELAY_SECS),
            Duration::from_secs_f64(PER_CHAT_EDIT_DELAY_SECS),
            Duration::from_secs_f64(PER_GROUP_MSG_DELAY_SECS),
        ));
        let producer = Arc::new(Producer::new(store.clone()));
        let controller = Arc::new(Controller::new(store.clone(), chat_limiter.clone(), producer.clone()));

        Ok(Self { store, chat_limiter, producer, controller })
    }
}
