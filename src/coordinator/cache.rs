//! Open coordinators by wallet name

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::ProposalCoordinator;

/// Coordinators kept alive between requests
///
/// Entries stay until the wallet is closed; nothing is evicted implicitly.
#[derive(Default)]
pub struct CoordinatorCache {
    coordinators: RwLock<HashMap<String, Arc<ProposalCoordinator>>>,
}

impl CoordinatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, wallet: &str) -> Option<Arc<ProposalCoordinator>> {
        self.coordinators.read().await.get(wallet).cloned()
    }

    /// Add a coordinator, replacing any open one for the same wallet
    pub async fn insert(&self, coordinator: ProposalCoordinator) -> Arc<ProposalCoordinator> {
        let coordinator = Arc::new(coordinator);
        let previous = self
            .coordinators
            .write()
            .await
            .insert(coordinator.name().to_string(), Arc::clone(&coordinator));
        if previous.is_some() {
            log::debug!("Replaced cached coordinator for {}", coordinator.name());
        }
        coordinator
    }

    /// Evict the coordinator of `wallet`
    pub async fn close(&self, wallet: &str) -> Option<Arc<ProposalCoordinator>> {
        let removed = self.coordinators.write().await.remove(wallet);
        if removed.is_some() {
            log::info!("Closed wallet {}", wallet);
        }
        removed
    }

    pub async fn clear(&self) {
        self.coordinators.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.coordinators.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.coordinators.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
