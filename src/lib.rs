//! Tiered photo storage with event backup and archival.
//!
//! Uploaded photos are placed on a primary object store, a secondary bulk
//! archive provider, or local disk depending on their importance and on
//! each backend's remaining quota. Backup jobs copy an event's photo set to
//! the secondary provider and, once complete, mark the event archived.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::Router;
use state::AppState;

/// Router with all routes and the shared state attached.
pub fn app(state: AppState) -> Router {
    routes::routes::routes().with_state(state)
}
