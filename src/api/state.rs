use std::sync::Arc;

use crate::ledger::LifecycleStore;
use crate::monitor::Monitor;

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<Monitor>,
    pub store: Arc<LifecycleStore>,
}

impl AppState {
    pub fn new(monitor: Arc<Monitor>, store: Arc<LifecycleStore>) -> Self {
        Self { monitor, store }
    }
}
