use crate::{config::AppConfig, remote::RemoteSource, snapshot::SnapshotVault};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub source: Arc<dyn RemoteSource>,
    pub vault: SnapshotVault,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, source: Arc<dyn RemoteSource>, vault: SnapshotVault) -> Self {
        Self {
            config,
            source,
            vault,
        }
    }
}
