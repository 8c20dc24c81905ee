use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::Runtime;
use crate::models::ResourceType;

/// Runtimes keyed by the resource type they serve. Built once by the caller
/// and passed to the engine.
#[derive(Clone, Default)]
pub struct RuntimeRegistry {
    runtimes: HashMap<ResourceType, Arc<dyn Runtime>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, resource_type: ResourceType, runtime: Arc<dyn Runtime>) -> Self {
        self.runtimes.insert(resource_type, runtime);
        self
    }

    pub fn get(&self, resource_type: ResourceType) -> Option<Arc<dyn Runtime>> {
        self.runtimes.get(&resource_type).cloned()
    }

    pub fn require(&self, resource_type: ResourceType) -> Result<Arc<dyn Runtime>> {
        self.get(resource_type)
            .ok_or_else(|| anyhow!("no runtime registered for {} resources", resource_type))
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }
}
