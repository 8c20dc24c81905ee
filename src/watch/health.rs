use serde_json::Value;

use super::expression::lookup;

/// Readiness verdict for one live object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Health {
    pub ready: bool,
    pub detail: String,
}

impl Health {
    fn ready(detail: impl Into<String>) -> Self {
        Self {
            ready: true,
            detail: detail.into(),
        }
    }

    fn waiting(detail: impl Into<String>) -> Self {
        Self {
            ready: false,
            detail: detail.into(),
        }
    }
}

fn int(object: &Value, path: &str) -> Option<i64> {
    lookup(object, path).and_then(Value::as_i64)
}

fn string<'a>(object: &'a Value, path: &str) -> Option<&'a str> {
    lookup(object, path).and_then(Value::as_str)
}

/// Built-in readiness heuristic keyed on `kind`. Kinds without a rule are
/// ready as soon as they exist.
pub fn default_health(object: &Value) -> Health {
    let kind = string(object, "kind").unwrap_or_default();
    match kind {
        "Deployment" => replicated(object, "status.updatedReplicas", "status.availableReplicas"),
        "StatefulSet" => replicated(object, "status.updatedReplicas", "status.readyReplicas"),
        "ReplicaSet" => replicated(object, "status.replicas", "status.readyReplicas"),
        "DaemonSet" => daemon_set(object),
        "Job" => job(object),
        "Pod" => pod(object),
        "Service" => service(object),
        "PersistentVolumeClaim" => phase_is(object, "Bound"),
        "Namespace" => phase_is(object, "Active"),
        _ => Health::ready("Exists"),
    }
}

fn generation_observed(object: &Value) -> bool {
    match (
        int(object, "metadata.generation"),
        int(object, "status.observedGeneration"),
    ) {
        (Some(generation), Some(observed)) => observed >= generation,
        (Some(_), None) => false,
        _ => true,
    }
}

fn replicated(object: &Value, updated_path: &str, ready_path: &str) -> Health {
    if !generation_observed(object) {
        return Health::waiting("Waiting for controller to observe the latest generation");
    }
    let desired = int(object, "spec.replicas").unwrap_or(1);
    let updated = int(object, updated_path).unwrap_or(0);
    let ready = int(object, ready_path).unwrap_or(0);
    let detail = format!("Ready: {}/{}, Updated: {}/{}", ready, desired, updated, desired);
    if updated >= desired && ready >= desired {
        Health::ready(detail)
    } else {
        Health::waiting(detail)
    }
}

fn daemon_set(object: &Value) -> Health {
    if !generation_observed(object) {
        return Health::waiting("Waiting for controller to observe the latest generation");
    }
    let desired = int(object, "status.desiredNumberScheduled").unwrap_or(0);
    let updated = int(object, "status.updatedNumberScheduled").unwrap_or(0);
    let ready = int(object, "status.numberReady").unwrap_or(0);
    let detail = format!("Ready: {}/{}, Updated: {}/{}", ready, desired, updated, desired);
    if updated >= desired && ready >= desired {
        Health::ready(detail)
    } else {
        Health::waiting(detail)
    }
}

fn job(object: &Value) -> Health {
    let completions = int(object, "spec.completions").unwrap_or(1);
    let succeeded = int(object, "status.succeeded").unwrap_or(0);
    let detail = format!("Succeeded: {}/{}", succeeded, completions);
    if succeeded >= completions {
        Health::ready(detail)
    } else {
        Health::waiting(detail)
    }
}

fn pod(object: &Value) -> Health {
    let phase = string(object, "status.phase").unwrap_or("Pending");
    match phase {
        "Succeeded" => Health::ready("Succeeded"),
        "Running" => {
            let containers = lookup(object, "status.containerStatuses")
                .and_then(Value::as_array)
                .map(|c| c.as_slice())
                .unwrap_or_default();
            let ready = containers
                .iter()
                .filter(|c| c.get("ready").and_then(Value::as_bool).unwrap_or(false))
                .count();
            let detail = format!("Running, containers ready: {}/{}", ready, containers.len());
            if ready == containers.len() {
                Health::ready(detail)
            } else {
                Health::waiting(detail)
            }
        }
        other => Health::waiting(other.to_string()),
    }
}

fn service(object: &Value) -> Health {
    if string(object, "spec.type") != Some("LoadBalancer") {
        return Health::ready("Service ready");
    }
    let has_ingress = lookup(object, "status.loadBalancer.ingress")
        .and_then(Value::as_array)
        .map(|i| !i.is_empty())
        .unwrap_or(false);
    if has_ingress {
        Health::ready("Load balancer provisioned")
    } else {
        Health::waiting("Waiting for load balancer ingress")
    }
}

fn phase_is(object: &Value, expected: &str) -> Health {
    let phase = string(object, "status.phase").unwrap_or("Unknown");
    if phase == expected {
        Health::ready(phase)
    } else {
        Health::waiting(phase)
    }
}
