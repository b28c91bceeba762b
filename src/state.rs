use std::sync::Arc;

use crate::auth::AuthService;
use crate::config::Config;
use crate::rooms::RoomRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<AuthService>,
    pub registry: Arc<RoomRegistry>,
}

impl AppState {
    pub fn new(config: Config, auth: AuthService, registry: Arc<RoomRegistry>) -> Self {
        Self {
            config: Arc::new(config),
            auth: Arc::new(auth),
            registry,
        }
    }
}
