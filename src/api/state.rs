//! Shared state handed to every API handler.

use std::sync::Arc;

use crate::events::EventBus;
use crate::store::Store;

#[derive(Clone)]
pub struct ApiState {
    pub store: Store,
    pub events: Arc<EventBus>,
}
