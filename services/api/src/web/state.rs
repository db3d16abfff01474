//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use std::sync::Arc;
use tutoring_core::{AuthProvider, Marketplace};

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub market: Marketplace,
    pub auth: Arc<dyn AuthProvider>,
    pub config: Arc<Config>,
}
