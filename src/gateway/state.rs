use std::sync::Arc;

use crate::auth::Authenticator;
use crate::cache::MemCache;

/// Shared gateway state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<MemCache>,
    pub auth: Arc<Authenticator>,
}

impl AppState {
    pub fn new(cache: Arc<MemCache>, auth: Arc<Authenticator>) -> Self {
        Self { cache, auth }
    }
}
