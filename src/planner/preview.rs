use std::collections::HashSet;

use tracing::{debug, info};

use super::diff::resources_equal;
use super::order::{ActionType, ChangeOrder, ChangeStep};
use crate::config::Scope;
use crate::dag::topological_order;
use crate::error::{EngineError, Result};
use crate::models::{Resource, Spec, State};
use crate::runtime::RuntimeRegistry;

/// Computes change orders. Side-effect free apart from `Runtime::prepare`.
pub struct Previewer<'a> {
    registry: &'a RuntimeRegistry,
    ignore_fields: &'a [String],
}

impl<'a> Previewer<'a> {
    pub fn new(registry: &'a RuntimeRegistry, ignore_fields: &'a [String]) -> Self {
        Self {
            registry,
            ignore_fields,
        }
    }

    /// Diff `spec` against `prior` and order the result for execution.
    pub async fn preview(&self, spec: &Spec, prior: &State, scope: &Scope) -> Result<ChangeOrder> {
        if spec.is_empty() {
            return Err(EngineError::Validation(format!(
                "spec for {} contains no resources",
                scope
            )));
        }
        check_unique_ids(&spec.resources)?;
        check_secret_references(spec)?;
        self.prepare(&spec.resources).await?;

        let desired_ids: HashSet<&str> = spec.resources.iter().map(|r| r.id.as_str()).collect();
        let nodes: Vec<(String, Vec<String>)> = spec
            .resources
            .iter()
            .map(|r| (r.id.clone(), r.depends_on.clone()))
            .collect();

        let mut order = ChangeOrder::new();
        for id in topological_order(&nodes)? {
            let Some(desired) = spec.get(&id) else { continue };
            let step = match prior.get(&id) {
                None => ChangeStep::new(&id, ActionType::Create, None, Some(desired.clone())),
                Some(recorded) if resources_equal(recorded, desired, self.ignore_fields) => {
                    ChangeStep::new(
                        &id,
                        ActionType::UnChanged,
                        Some(recorded.clone()),
                        Some(desired.clone()),
                    )
                }
                Some(recorded) => ChangeStep::new(
                    &id,
                    ActionType::Update,
                    Some(recorded.clone()),
                    Some(desired.clone()),
                ),
            };
            order.push(step);
        }

        let removed: Vec<&Resource> = prior
            .resources
            .iter()
            .filter(|r| !desired_ids.contains(r.id.as_str()))
            .collect();
        for step in delete_steps(&removed)? {
            order.push(step);
        }

        let summary = order.summary();
        info!(
            scope = %scope,
            create = summary.create,
            update = summary.update,
            delete = summary.delete,
            unchanged = summary.unchanged,
            "Preview complete"
        );
        Ok(order)
    }

    /// An all-delete order for every recorded resource, dependents first.
    pub async fn preview_destroy(&self, prior: &State, scope: &Scope) -> Result<ChangeOrder> {
        check_unique_ids(&prior.resources)?;
        self.prepare(&prior.resources).await?;

        let recorded: Vec<&Resource> = prior.resources.iter().collect();
        let mut order = ChangeOrder::new();
        for step in delete_steps(&recorded)? {
            order.push(step);
        }
        info!(scope = %scope, delete = order.len(), "Destroy preview complete");
        Ok(order)
    }

    async fn prepare(&self, resources: &[Resource]) -> Result<()> {
        for resource in resources {
            let Some(runtime) = self.registry.get(resource.resource_type) else {
                debug!(id = %resource.id, kind = %resource.resource_type, "No runtime registered; skipping prepare");
                continue;
            };
            runtime.prepare(resource).await.map_err(|e| {
                EngineError::planning_with(format!("preparing resource '{}'", resource.id), e)
            })?;
        }
        Ok(())
    }
}

/// Delete steps for `removed` in reverse recorded dependency order. Edges to
/// resources outside `removed` are ignored.
fn delete_steps(removed: &[&Resource]) -> Result<Vec<ChangeStep>> {
    let ids: HashSet<&str> = removed.iter().map(|r| r.id.as_str()).collect();
    let nodes: Vec<(String, Vec<String>)> = removed
        .iter()
        .map(|r| {
            let deps = r
                .depends_on
                .iter()
                .filter(|d| ids.contains(d.as_str()))
                .cloned()
                .collect();
            (r.id.clone(), deps)
        })
        .collect();

    let mut ordered = topological_order(&nodes)?;
    ordered.reverse();
    Ok(ordered
        .into_iter()
        .filter_map(|id| removed.iter().find(|r| r.id == id).copied())
        .map(|r| ChangeStep::new(&r.id, ActionType::Delete, Some(r.clone()), None))
        .collect())
}

fn check_unique_ids(resources: &[Resource]) -> Result<()> {
    let mut seen = HashSet::new();
    for resource in resources {
        if !seen.insert(resource.id.as_str()) {
            return Err(EngineError::Validation(format!(
                "duplicate resource id '{}'",
                resource.id
            )));
        }
    }
    Ok(())
}

fn check_secret_references(spec: &Spec) -> Result<()> {
    if spec.secret_store.is_some() {
        return Ok(());
    }
    for resource in &spec.resources {
        if let Some(path) = resource.secret_reference() {
            return Err(EngineError::Validation(format!(
                "resource '{}' references a secret at '{}' but no secret store is configured",
                resource.id, path
            )));
        }
    }
    Ok(())
}
