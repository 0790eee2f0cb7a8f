//! API layer - HTTP endpoint handlers organized by domain.

mod connection;
mod events;
mod health;
mod metrics;
mod routes;

// Re-export all handlers for use in server/app.rs
pub use connection::{project_connections, ProjectConnectionsResponse};
pub use events::{publish_event, PublishEventResponse};
pub use health::{health, stats};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
