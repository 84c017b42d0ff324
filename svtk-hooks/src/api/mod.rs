//! HTTP API handlers for svtk-hooks

pub mod admin;
pub mod health;
pub mod hooks;

pub use admin::admin_routes;
pub use health::health_routes;
pub use hooks::hook_routes;
