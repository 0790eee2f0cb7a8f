use serde::{Deserialize, Serialize};

use crate::hub::UserId;

/// Claims carried by access tokens issued at login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Numeric user ID
    pub user_id: UserId,
    #[serde(default)]
    pub username: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
}
