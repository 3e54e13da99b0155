// tests/integration/fixtures.rs

//! Common fixtures: an in-process ensemble plus one or more connected
//! factories (each on its own session), and a few canonical entity names.

use std::sync::Arc;

use clusterlib::config::ClusterlibConfig;
use clusterlib::core::factory::Factory;
use clusterlib::core::notifyable::{
    AccessType, Application, Group, HasApplications, HasGroups, Root,
};
use clusterlib::core::store::memory::{MemoryEnsemble, MemoryStore};
use clusterlib::core::store::DataStore;

pub const TEST_APP: &str = "test-app";
pub const TEST_GROUP: &str = "serving";

pub struct TestCluster {
    pub ensemble: Arc<MemoryEnsemble>,
    pub stores: Vec<Arc<MemoryStore>>,
    pub factories: Vec<Factory>,
}

impl TestCluster {
    /// Expires the store session behind `factories[index]`, as the
    /// ensemble would on a missed heartbeat deadline.
    pub fn expire(&self, index: usize) {
        self.ensemble.expire_session(self.stores[index].session_id());
    }

    pub async fn shutdown(&self) {
        for factory in &self.factories {
            let _ = factory.shutdown().await;
        }
    }
}

/// One ensemble plus `n` factories.
pub async fn cluster(n: usize) -> TestCluster {
    let ensemble = MemoryEnsemble::new();
    let mut stores = Vec::with_capacity(n);
    let mut factories = Vec::with_capacity(n);
    for _ in 0..n {
        let store = ensemble.connect();
        let factory = Factory::connect(store.clone(), ClusterlibConfig::default())
            .await
            .expect("factory connects");
        stores.push(store);
        factories.push(factory);
    }
    TestCluster {
        ensemble,
        stores,
        factories,
    }
}

pub async fn single() -> TestCluster {
    cluster(1).await
}

/// Root -> application -> group, created if absent.
pub async fn app_and_group(factory: &Factory) -> (Root, Application, Group) {
    let root = factory.get_root().await.expect("root");
    let app = root
        .get_application(TEST_APP, AccessType::CreateIfNotFound)
        .await
        .expect("application access")
        .expect("application created");
    let group = app
        .get_group(TEST_GROUP, AccessType::CreateIfNotFound)
        .await
        .expect("group access")
        .expect("group created");
    (root, app, group)
}
