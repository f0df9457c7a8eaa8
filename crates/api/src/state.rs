//! Shared application state

use std::sync::Arc;

use crate::auth::{AuthState, JwtManager};
use crate::config::Config;
use crate::support::SessionService;
use crate::websocket::RealtimeChannel;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jwt_manager: Arc<JwtManager>,
    pub sessions: SessionService,
}

impl AppState {
    pub fn new(config: Config, sessions: SessionService) -> Self {
        let jwt_manager = Arc::new(JwtManager::new(&config.jwt_secret));
        Self {
            config: Arc::new(config),
            jwt_manager,
            sessions,
        }
    }

    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: Arc::clone(&self.jwt_manager),
        }
    }

    pub fn realtime(&self) -> &RealtimeChannel {
        self.sessions.realtime()
    }
}
