//! ExecutorRegistry - concurrent name → executor directory
//!
//! Sharded map so lookups on the submission path never wait on a refresh or
//! registration of a different executor.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::error::DtpError;
use crate::executor::DynamicExecutor;
use crate::snapshot::ExecutorSnapshot;
use crate::Result;

#[derive(Default)]
pub struct ExecutorRegistry {
    executors: DashMap<String, Arc<DynamicExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the executor under its own name. Last writer wins.
    /// `source` is free text recording where the executor came from.
    pub fn register(&self, executor: Arc<DynamicExecutor>, source: &str) {
        let snapshot = ExecutorSnapshot::capture(&executor);
        let replaced = self
            .executors
            .insert(executor.name().to_string(), executor)
            .is_some();

        info!(
            executor = %snapshot.name,
            source = %source,
            replaced = replaced,
            core_size = snapshot.core_size,
            max_size = snapshot.max_size,
            queue_type = %snapshot.queue_type,
            queue_capacity = snapshot.queue_capacity,
            keep_alive_ms = snapshot.keep_alive.as_millis() as u64,
            reject_policy = %snapshot.reject_policy,
            "Executor registered"
        );
    }

    pub fn get_executor(&self, name: &str) -> Result<Arc<DynamicExecutor>> {
        self.executors
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DtpError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }

    /// Point-in-time copy of the registered names, sorted
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.executors.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Point-in-time copy of every registered executor
    pub fn executors(&self) -> Vec<Arc<DynamicExecutor>> {
        self.executors.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Shut every executor down, honouring each one's graceful-shutdown flag
    pub async fn shutdown_all(&self) {
        for executor in self.executors() {
            executor.shutdown().await;
        }
        info!(executors = self.len(), "All executors shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtp_common::ExecutorProperties;

    fn executor(name: &str, core: i64) -> Arc<DynamicExecutor> {
        let mut props = ExecutorProperties::named(name);
        props.core_pool_size = core;
        props.maximum_pool_size = 8;
        DynamicExecutor::from_properties(&props).unwrap()
    }

    #[test]
    fn test_lookup_unregistered_is_not_found() {
        let registry = ExecutorRegistry::new();
        assert!(matches!(
            registry.get_executor("unregistered"),
            Err(DtpError::NotFound(name)) if name == "unregistered"
        ));
    }

    #[test]
    fn test_register_overwrites_by_name() {
        let registry = ExecutorRegistry::new();
        registry.register(executor("io", 1), "test");
        registry.register(executor("io", 3), "test");

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_executor("io").unwrap().core_size(), 3);
    }

    #[test]
    fn test_list_names_is_a_snapshot() {
        let registry = ExecutorRegistry::new();
        registry.register(executor("b", 1), "test");
        registry.register(executor("a", 1), "test");

        let names = registry.list_names();
        registry.register(executor("c", 1), "test");

        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.list_names().len(), 3);
    }
}
