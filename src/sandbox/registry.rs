//! Server Registry (C2): the authoritative in-process index of Server
//! Instances, keyed by id.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::error::AgentError;
use crate::persistence::IdStore;
use crate::sandbox::driver::ContainerDriver;
use crate::sandbox::instance::{ServerInstance, CONTAINER_PREFIX};
use crate::sandbox::types::ServerId;

pub struct ServerRegistry {
    base_path: PathBuf,
    driver: Arc<ContainerDriver>,
    id_store: Arc<dyn IdStore>,
    instances: RwLock<HashMap<ServerId, Arc<ServerInstance>>>,
}

impl ServerRegistry {
    pub fn new(base_path: PathBuf, driver: Arc<ContainerDriver>, id_store: Arc<dyn IdStore>) -> Self {
        Self {
            base_path,
            driver,
            id_store,
            instances: RwLock::new(HashMap::new()),
        }
    }

    fn sandbox_root(&self, id: &str) -> PathBuf {
        self.base_path.join(id)
    }

    /// Boot-time reconciliation: for every persisted id, construct an
    /// instance and look up a matching `{prefix}{id}` container. If found
    /// and running, adopt its handle and `startedAt`.
    pub async fn reconcile(&self) -> Result<(), AgentError> {
        let ids = self
            .id_store
            .list_ids()
            .map_err(|e| AgentError::RuntimeFailed(format!("id store unreadable: {e}")))?;

        for id in ids {
            let instance = Arc::new(ServerInstance::new(
                id.clone(),
                self.sandbox_root(&id),
                self.driver.clone(),
            ));

            let container_name = format!("{CONTAINER_PREFIX}{id}");
            if let Ok(Some(handle)) = self.driver.find_by_name(&container_name).await {
                if let Ok(info) = self.driver.inspect(&handle).await {
                    if info.running {
                        instance.adopt(handle, info.started_at);
                        tracing::info!(server = %id, "reconciled running container on boot");
                    }
                }
            }

            self.instances.write().unwrap().insert(id, instance);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<ServerInstance>> {
        self.instances.read().unwrap().get(id).cloned()
    }

    pub fn create(&self, id: ServerId) -> Result<Arc<ServerInstance>, AgentError> {
        if self.instances.read().unwrap().contains_key(&id) {
            return Err(AgentError::InputInvalid(format!("server already exists: {id}")));
        }

        let sandbox_root = self.sandbox_root(&id);
        std::fs::create_dir_all(&sandbox_root)
            .map_err(|e| AgentError::RuntimeFailed(format!("creating sandbox dir: {e}")))?;

        self.id_store
            .add_id(&id)
            .map_err(|e| AgentError::RuntimeFailed(format!("id store write failed: {e}")))?;

        let instance = Arc::new(ServerInstance::new(id.clone(), sandbox_root, self.driver.clone()));
        self.instances.write().unwrap().insert(id, instance.clone());
        Ok(instance)
    }

    pub fn remove(&self, id: &str) -> Result<(), AgentError> {
        self.instances.write().unwrap().remove(id);
        self.id_store
            .remove_id(id)
            .map_err(|e| AgentError::RuntimeFailed(format!("id store delete failed: {e}")))
    }

    pub fn len(&self) -> usize {
        self.instances.read().unwrap().len()
    }

    /// Every registered id starting with `prefix` — used by the SFTP
    /// service's unique-prefix username resolution.
    pub fn ids_with_prefix(&self, prefix: &str) -> Vec<ServerId> {
        self.instances
            .read()
            .unwrap()
            .keys()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SqliteIdStore;

    fn registry() -> (tempfile::TempDir, ServerRegistry) {
        let tmp = tempfile::tempdir().unwrap();
        let driver_result = ContainerDriver::connect();
        // Tests that don't touch the runtime never call methods needing a
        // real daemon; connect() only opens the local socket path lazily.
        let driver = Arc::new(driver_result.expect("local docker socket path construction"));
        let id_store = Arc::new(SqliteIdStore::open_in_memory().unwrap());
        let registry = ServerRegistry::new(tmp.path().to_path_buf(), driver, id_store);
        (tmp, registry)
    }

    #[test]
    fn create_allocates_directory_and_registers() {
        let (tmp, registry) = registry();
        let instance = registry.create("s1".to_string()).unwrap();
        assert_eq!(instance.id, "s1");
        assert!(tmp.path().join("s1").exists());
        assert_eq!(registry.len(), 1);
        assert!(registry.get("s1").is_some());
    }

    #[test]
    fn create_rejects_duplicate_id() {
        let (_tmp, registry) = registry();
        registry.create("s1".to_string()).unwrap();
        assert!(registry.create("s1".to_string()).is_err());
    }

    #[test]
    fn remove_drops_from_index() {
        let (_tmp, registry) = registry();
        registry.create("s1".to_string()).unwrap();
        registry.remove("s1").unwrap();
        assert!(registry.get("s1").is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn prefix_lookup_finds_unique_match() {
        let (_tmp, registry) = registry();
        registry.create("abc123".to_string()).unwrap();
        registry.create("xyz789".to_string()).unwrap();
        assert_eq!(registry.ids_with_prefix("abc"), vec!["abc123".to_string()]);
    }

    #[test]
    fn prefix_lookup_is_ambiguous_with_two_matches() {
        let (_tmp, registry) = registry();
        registry.create("abc123".to_string()).unwrap();
        registry.create("abc456".to_string()).unwrap();
        assert_eq!(registry.ids_with_prefix("abc").len(), 2);
    }
}
