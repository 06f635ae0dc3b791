use config::Config;
use log::{info, warn};
use realtime::medium::{LocalMedium, PubSubMedium, RedisMedium};
use realtime::Manager;
use std::sync::Arc;

pub mod config;
pub mod logging;

/// Connect to the pub/sub medium named by the configuration.
///
/// Without a Redis URL the process falls back to an in-process medium,
/// which only reaches connections held by this same process.
pub async fn init_medium(config: &Config) -> Result<Arc<dyn PubSubMedium>, realtime::Error> {
    match config.redis_url() {
        Some(url) => {
            info!("Connecting to Redis pub/sub medium");
            let medium = RedisMedium::connect(url).await?;
            Ok(Arc::new(medium))
        }
        None => {
            warn!("No Redis URL configured, events will only reach connections in this process");
            Ok(Arc::new(LocalMedium::new()))
        }
    }
}

// Service-level state containing only infrastructure concerns
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
    pub config: Config,
}

impl AppState {
    pub fn new(app_config: Config, medium: Arc<dyn PubSubMedium>) -> Self {
        Self {
            manager: Arc::new(Manager::new(medium)),
            config: app_config,
        }
    }

    pub fn manager_ref(&self) -> &Manager {
        self.manager.as_ref()
    }
}
