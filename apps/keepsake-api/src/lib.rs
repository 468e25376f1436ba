pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod routes;

use std::sync::Arc;

use auth::tokens::TokenVerifier;
use config::Config;
use db::users::UserDirectory;
use gateway::layer::GroupLayer;
use gateway::notify::Notifier;
use gateway::presence::Presence;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserDirectory>,
    pub presence: Presence,
    pub layer: Arc<dyn GroupLayer>,
    pub notifier: Notifier,
    pub tokens: TokenVerifier,
    pub config: Arc<Config>,
}
