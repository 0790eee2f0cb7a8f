// Shared components
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;

// Realtime core
pub mod hub;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod shutdown;
pub mod tasks;
