pub mod auth;
pub mod config;
pub mod device;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod telemetry;
