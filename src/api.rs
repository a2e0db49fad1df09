//! HTTP API for the turn broker

mod handlers;
mod types;

pub use handlers::create_router;

use crate::turn::TurnProcessor;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub turns: Arc<TurnProcessor>,
}

impl AppState {
    pub fn new(turns: TurnProcessor) -> Self {
        Self {
            turns: Arc::new(turns),
        }
    }
}
