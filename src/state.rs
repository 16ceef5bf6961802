use std::sync::Arc;

use crate::client::FeatureFlags;
use crate::refresh::Refresher;

#[derive(Clone)]
pub struct AppState {
    pub flags: FeatureFlags,
    pub refresher: Refresher,
    pub webhook_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(flags: FeatureFlags, refresher: Refresher, webhook_secret: Option<&str>) -> Self {
        Self {
            flags,
            refresher,
            webhook_secret: webhook_secret.map(Arc::from),
        }
    }
}
