use std::sync::Arc;

use crate::engine::NotifyEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<NotifyEngine>,
}

impl AppState {
    pub fn new(engine: Arc<NotifyEngine>) -> Self {
        Self { engine }
    }
}
