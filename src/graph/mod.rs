//! The persisted resource ledger.
//!
//! A [`Graph`] partitions resources into workload, dependency and other
//! categories and keeps a flat index over all three. Every mutation goes
//! through methods that preserve two invariants:
//!
//! * the index keys are exactly the union of the category keys, and
//! * no id appears in more than one category.

pub mod handle;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Scope;
use crate::error::{EngineError, Result};
use crate::models::{Resource, ResourceType, Spec, CATEGORY_EXTENSION};

pub use handle::GraphHandle;

/// Kubernetes kinds treated as workloads.
const WORKLOAD_KINDS: &[&str] = &[
    "Deployment",
    "StatefulSet",
    "DaemonSet",
    "ReplicaSet",
    "Job",
    "CronJob",
    "Pod",
];

/// Apply and reconcile status of a graph node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceStatus {
    #[default]
    Pending,
    ApplySucceed,
    ApplyFail,
    Reconciled,
    ReconcileFail,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceStatus::Pending => "pending",
            ResourceStatus::ApplySucceed => "apply-succeed",
            ResourceStatus::ApplyFail => "apply-fail",
            ResourceStatus::Reconciled => "reconciled",
            ResourceStatus::ReconcileFail => "reconcile-fail",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceCategory {
    Workload,
    Dependency,
    Other,
}

impl ResourceCategory {
    /// Category of a desired resource: an explicit extension wins, otherwise
    /// Kubernetes workload kinds are workloads and Terraform resources are
    /// dependencies.
    pub fn of(resource: &Resource) -> Self {
        match resource
            .extensions
            .get(CATEGORY_EXTENSION)
            .and_then(|v| v.as_str())
        {
            Some("workload") => return ResourceCategory::Workload,
            Some("dependency") => return ResourceCategory::Dependency,
            Some("other") => return ResourceCategory::Other,
            _ => {}
        }
        match resource.resource_type {
            ResourceType::Kubernetes if WORKLOAD_KINDS.contains(&resource.kind()) => {
                ResourceCategory::Workload
            }
            ResourceType::Terraform => ResourceCategory::Dependency,
            _ => ResourceCategory::Other,
        }
    }
}

/// One node of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphResource {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(default)]
    pub cloud_resource_id: String,
    #[serde(default)]
    pub status: ResourceStatus,
    #[serde(default)]
    pub dependents: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl GraphResource {
    pub fn from_resource(resource: &Resource) -> Self {
        Self {
            id: resource.id.clone(),
            resource_type: resource.kind().to_string(),
            name: resource.name().to_string(),
            cloud_resource_id: String::new(),
            status: ResourceStatus::Pending,
            dependents: vec![],
            dependencies: resource.depends_on.clone(),
        }
    }
}

/// Remote identifier of an applied resource: the Kubernetes object uid, or
/// the Terraform `id`/`arn` attribute.
pub fn cloud_resource_id(resource: &Resource) -> String {
    let attrs = &resource.attributes;
    let found = match resource.resource_type {
        ResourceType::Kubernetes => attrs.pointer("/metadata/uid").and_then(|v| v.as_str()),
        ResourceType::Terraform => attrs
            .get("id")
            .or_else(|| attrs.get("arn"))
            .and_then(|v| v.as_str()),
    };
    found.unwrap_or_default().to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphResources {
    #[serde(default)]
    workload_resources: BTreeMap<String, GraphResource>,
    #[serde(default)]
    dependency_resources: BTreeMap<String, GraphResource>,
    #[serde(default)]
    other_resources: BTreeMap<String, GraphResource>,
    #[serde(default)]
    resource_index: BTreeMap<String, ResourceCategory>,
}

impl GraphResources {
    fn category_map(&self, category: ResourceCategory) -> &BTreeMap<String, GraphResource> {
        match category {
            ResourceCategory::Workload => &self.workload_resources,
            ResourceCategory::Dependency => &self.dependency_resources,
            ResourceCategory::Other => &self.other_resources,
        }
    }

    fn category_map_mut(
        &mut self,
        category: ResourceCategory,
    ) -> &mut BTreeMap<String, GraphResource> {
        match category {
            ResourceCategory::Workload => &mut self.workload_resources,
            ResourceCategory::Dependency => &mut self.dependency_resources,
            ResourceCategory::Other => &mut self.other_resources,
        }
    }

    pub fn workload(&self) -> &BTreeMap<String, GraphResource> {
        &self.workload_resources
    }

    pub fn dependency(&self) -> &BTreeMap<String, GraphResource> {
        &self.dependency_resources
    }

    pub fn other(&self) -> &BTreeMap<String, GraphResource> {
        &self.other_resources
    }

    pub fn index(&self) -> &BTreeMap<String, ResourceCategory> {
        &self.resource_index
    }
}

/// The resource ledger of one project/stack/workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub project: String,
    pub stack: String,
    pub workspace: String,
    #[serde(default)]
    pub resources: GraphResources,
}

impl Graph {
    pub fn new(scope: &Scope) -> Self {
        Self {
            project: scope.project.clone(),
            stack: scope.stack.clone(),
            workspace: scope.workspace.clone(),
            resources: GraphResources::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.resources.resource_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.resource_index.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resources.resource_index.contains_key(id)
    }

    pub fn category(&self, id: &str) -> Option<ResourceCategory> {
        self.resources.resource_index.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<&GraphResource> {
        let category = self.category(id)?;
        self.resources.category_map(category).get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut GraphResource> {
        let category = self.category(id)?;
        self.resources.category_map_mut(category).get_mut(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.resources.resource_index.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GraphResource> {
        self.resources
            .workload_resources
            .values()
            .chain(self.resources.dependency_resources.values())
            .chain(self.resources.other_resources.values())
    }

    /// Insert or replace a node in `category`, moving it out of any other
    /// category it previously lived in.
    pub fn insert(&mut self, category: ResourceCategory, node: GraphResource) {
        if let Some(prev) = self.category(&node.id) {
            if prev != category {
                self.resources.category_map_mut(prev).remove(&node.id);
            }
        }
        self.resources
            .resource_index
            .insert(node.id.clone(), category);
        self.resources
            .category_map_mut(category)
            .insert(node.id.clone(), node);
    }

    /// Remove a node and every edge pointing at it.
    pub fn remove(&mut self, id: &str) -> Option<GraphResource> {
        let category = self.resources.resource_index.remove(id)?;
        let removed = self.resources.category_map_mut(category).remove(id);
        for map in [
            &mut self.resources.workload_resources,
            &mut self.resources.dependency_resources,
            &mut self.resources.other_resources,
        ] {
            for node in map.values_mut() {
                node.dependents.retain(|d| d != id);
                node.dependencies.retain(|d| d != id);
            }
        }
        removed
    }

    pub fn set_status(&mut self, id: &str, status: ResourceStatus) -> bool {
        match self.get_mut(id) {
            Some(node) => {
                node.status = status;
                true
            }
            None => false,
        }
    }

    /// Merge newly desired resources into the ledger. New resources enter as
    /// `Pending`; existing ones keep their status and cloud id but pick up
    /// the desired category and dependency edges. Resources absent from the
    /// spec stay until their delete succeeds.
    pub fn merge_spec(&mut self, spec: &Spec) {
        for resource in &spec.resources {
            let category = ResourceCategory::of(resource);
            let node = match self.get(&resource.id) {
                Some(existing) => GraphResource {
                    dependencies: resource.depends_on.clone(),
                    resource_type: resource.kind().to_string(),
                    name: resource.name().to_string(),
                    ..existing.clone()
                },
                None => GraphResource::from_resource(resource),
            };
            self.insert(category, node);
        }
        self.rebuild_dependents();
    }

    /// Recompute every node's dependents from the dependency edges, dropping
    /// edges to ids that are no longer in the graph.
    pub fn rebuild_dependents(&mut self) {
        let known: BTreeSet<String> = self.resources.resource_index.keys().cloned().collect();
        let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for node in self.iter() {
            for dep in &node.dependencies {
                if known.contains(dep) {
                    dependents.entry(dep.clone()).or_default().push(node.id.clone());
                }
            }
        }
        for map in [
            &mut self.resources.workload_resources,
            &mut self.resources.dependency_resources,
            &mut self.resources.other_resources,
        ] {
            for node in map.values_mut() {
                node.dependencies.retain(|d| known.contains(d));
                node.dependents = dependents.remove(&node.id).unwrap_or_default();
            }
        }
    }

    /// Structural validation applied to graphs loaded from storage.
    pub fn validate(&self) -> Result<()> {
        let mut seen: BTreeMap<&str, ResourceCategory> = BTreeMap::new();
        for category in [
            ResourceCategory::Workload,
            ResourceCategory::Dependency,
            ResourceCategory::Other,
        ] {
            for (key, node) in self.resources.category_map(category) {
                if key != &node.id {
                    return Err(inconsistent(key, format!("keyed under a different id '{}'", node.id)));
                }
                if let Some(prev) = seen.insert(key.as_str(), category) {
                    return Err(inconsistent(
                        key,
                        format!("present in both {:?} and {:?} categories", prev, category),
                    ));
                }
                match self.resources.resource_index.get(key) {
                    Some(indexed) if *indexed == category => {}
                    Some(indexed) => {
                        return Err(inconsistent(
                            key,
                            format!("indexed as {:?} but stored as {:?}", indexed, category),
                        ))
                    }
                    None => return Err(inconsistent(key, "missing from the resource index")),
                }
                for edge in node.dependencies.iter().chain(node.dependents.iter()) {
                    if !self.resources.resource_index.contains_key(edge) {
                        return Err(inconsistent(key, format!("edge to unknown resource '{}'", edge)));
                    }
                }
            }
        }
        if let Some(stray) = self
            .resources
            .resource_index
            .keys()
            .find(|k| !seen.contains_key(k.as_str()))
        {
            return Err(inconsistent(stray, "indexed but not stored in any category"));
        }
        Ok(())
    }
}

fn inconsistent(id: &str, reason: impl Into<String>) -> EngineError {
    EngineError::GraphConsistency {
        id: id.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> Scope {
        Scope::new("shop", "dev", "default")
    }

    fn spec() -> Spec {
        Spec::new(vec![
            Resource::new("v1:Namespace:shop", ResourceType::Kubernetes, json!({})),
            Resource::new("apps/v1:Deployment:shop:web", ResourceType::Kubernetes, json!({}))
                .with_depends_on(&["v1:Namespace:shop", "hashicorp:aws:aws_db_instance:db"]),
            Resource::new("hashicorp:aws:aws_db_instance:db", ResourceType::Terraform, json!({})),
        ])
    }

    fn assert_partition(graph: &Graph) {
        let r = &graph.resources;
        let union: BTreeSet<&String> = r
            .workload()
            .keys()
            .chain(r.dependency().keys())
            .chain(r.other().keys())
            .collect();
        let index: BTreeSet<&String> = r.index().keys().collect();
        assert_eq!(union, index);
        assert_eq!(
            union.len(),
            r.workload().len() + r.dependency().len() + r.other().len(),
            "categories overlap"
        );
    }

    #[test]
    fn merge_categorizes_and_links() {
        let mut graph = Graph::new(&scope());
        graph.merge_spec(&spec());

        assert_partition(&graph);
        assert_eq!(graph.category("apps/v1:Deployment:shop:web"), Some(ResourceCategory::Workload));
        assert_eq!(graph.category("hashicorp:aws:aws_db_instance:db"), Some(ResourceCategory::Dependency));
        assert_eq!(graph.category("v1:Namespace:shop"), Some(ResourceCategory::Other));

        let ns = graph.get("v1:Namespace:shop").unwrap();
        assert_eq!(ns.dependents, vec!["apps/v1:Deployment:shop:web".to_string()]);
        assert_eq!(ns.status, ResourceStatus::Pending);
        graph.validate().unwrap();
    }

    #[test]
    fn merge_keeps_status_and_moves_category() {
        let mut graph = Graph::new(&scope());
        graph.merge_spec(&spec());
        graph.set_status("v1:Namespace:shop", ResourceStatus::Reconciled);

        let mut next = spec();
        next.resources[0] = next.resources[0]
            .clone()
            .with_extension(CATEGORY_EXTENSION, json!("dependency"));
        graph.merge_spec(&next);

        assert_partition(&graph);
        assert_eq!(graph.category("v1:Namespace:shop"), Some(ResourceCategory::Dependency));
        assert_eq!(graph.get("v1:Namespace:shop").unwrap().status, ResourceStatus::Reconciled);
    }

    #[test]
    fn remove_drops_node_and_edges() {
        let mut graph = Graph::new(&scope());
        graph.merge_spec(&spec());
        assert!(graph.remove("v1:Namespace:shop").is_some());

        assert_partition(&graph);
        assert!(!graph.contains("v1:Namespace:shop"));
        let web = graph.get("apps/v1:Deployment:shop:web").unwrap();
        assert_eq!(web.dependencies, vec!["hashicorp:aws:aws_db_instance:db".to_string()]);
        graph.validate().unwrap();
    }

    #[test]
    fn validate_rejects_duplicate_categories() {
        let mut graph = Graph::new(&scope());
        graph.merge_spec(&spec());
        let dup = graph.get("v1:Namespace:shop").unwrap().clone();
        graph
            .resources
            .workload_resources
            .insert(dup.id.clone(), dup);

        let err = graph.validate().unwrap_err();
        assert!(matches!(err, EngineError::GraphConsistency { ref id, .. } if id == "v1:Namespace:shop"));
    }

    #[test]
    fn validate_rejects_dangling_edges() {
        let mut graph = Graph::new(&scope());
        graph.merge_spec(&spec());
        graph
            .get_mut("v1:Namespace:shop")
            .unwrap()
            .dependents
            .push("ghost".to_string());
        assert!(matches!(
            graph.validate(),
            Err(EngineError::GraphConsistency { .. })
        ));
    }

    #[test]
    fn round_trips_through_json() {
        let mut graph = Graph::new(&scope());
        graph.merge_spec(&spec());
        let text = serde_json::to_string(&graph).unwrap();
        let back: Graph = serde_json::from_str(&text).unwrap();
        assert_eq!(back, graph);
        back.validate().unwrap();
    }
}
