mod settings;

pub use settings::{ApiConfig, JwtConfig, ServerConfig, Settings, WebSocketConfig};
