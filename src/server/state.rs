use std::sync::Arc;

use crate::auth::{JwtValidator, TokenVerifier};
use crate::config::Settings;
use crate::hub::Hub;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub hub: Hub,
}

impl AppState {
    /// Build the state with JWT verification. Spawns the hub, so it must be
    /// called from within a Tokio runtime.
    pub fn new(settings: Settings) -> Self {
        let verifier = Arc::new(JwtValidator::new(&settings.jwt));
        Self::with_verifier(settings, verifier)
    }

    pub fn with_verifier(settings: Settings, verifier: Arc<dyn TokenVerifier>) -> Self {
        let (hub, _dispatcher) = Hub::spawn(settings.websocket.command_buffer);

        Self {
            settings: Arc::new(settings),
            verifier,
            hub,
        }
    }
}
