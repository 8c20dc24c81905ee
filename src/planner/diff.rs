use serde_json::Value;

use crate::models::Resource;

/// Remove every dotted path in `ignore_fields` from a copy of `value`.
///
/// Arrays along a path are traversed element-wise, so `spec.ports.nodePort`
/// masks the field in every port.
pub fn strip_ignored(value: &Value, ignore_fields: &[String]) -> Value {
    let mut masked = value.clone();
    for field in ignore_fields {
        let segments: Vec<&str> = field.split('.').filter(|s| !s.is_empty()).collect();
        if !segments.is_empty() {
            remove_path(&mut masked, &segments);
        }
    }
    masked
}

fn remove_path(value: &mut Value, segments: &[&str]) {
    match value {
        Value::Object(map) => {
            if segments.len() == 1 {
                map.remove(segments[0]);
            } else if let Some(child) = map.get_mut(segments[0]) {
                remove_path(child, &segments[1..]);
            }
        }
        Value::Array(items) => {
            for item in items {
                remove_path(item, segments);
            }
        }
        _ => {}
    }
}

/// Whether a recorded and a desired resource are the same once
/// `ignore_fields` are masked out of their attributes.
pub fn resources_equal(prior: &Resource, desired: &Resource, ignore_fields: &[String]) -> bool {
    prior.resource_type == desired.resource_type
        && prior.depends_on == desired.depends_on
        && prior.extensions == desired.extensions
        && strip_ignored(&prior.attributes, ignore_fields)
            == strip_ignored(&desired.attributes, ignore_fields)
}

fn render(resource: Option<&Resource>, ignore_fields: &[String]) -> String {
    let Some(resource) = resource else {
        return String::new();
    };
    let mut masked = resource.clone();
    masked.attributes = strip_ignored(&resource.attributes, ignore_fields);
    let mut text = serde_json::to_string_pretty(&masked).unwrap_or_default();
    text.push('\n');
    text
}

/// Unified diff of the pretty-printed resources. Empty when nothing differs.
pub fn unified_diff(
    prior: Option<&Resource>,
    desired: Option<&Resource>,
    ignore_fields: &[String],
) -> String {
    let old = render(prior, ignore_fields);
    let new = render(desired, ignore_fields);
    if old == new {
        return String::new();
    }
    similar::TextDiff::from_lines(&old, &new)
        .unified_diff()
        .context_radius(3)
        .header("recorded", "desired")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceType;
    use serde_json::json;

    fn deployment(generation: u64, replicas: u64) -> Resource {
        Resource::new(
            "apps/v1:Deployment:default:web",
            ResourceType::Kubernetes,
            json!({
                "metadata": {"name": "web", "generation": generation},
                "spec": {"replicas": replicas}
            }),
        )
    }

    #[test]
    fn masked_fields_do_not_count_as_changes() {
        let ignore = vec!["metadata.generation".to_string()];
        assert!(resources_equal(&deployment(1, 2), &deployment(7, 2), &ignore));
        assert!(!resources_equal(&deployment(1, 2), &deployment(1, 3), &ignore));
        assert!(!resources_equal(&deployment(1, 2), &deployment(7, 2), &[]));
    }

    #[test]
    fn mask_walks_arrays() {
        let value = json!({"ports": [{"port": 80, "nodePort": 30001}, {"port": 443, "nodePort": 30002}]});
        let masked = strip_ignored(&value, &["ports.nodePort".to_string()]);
        assert_eq!(masked, json!({"ports": [{"port": 80}, {"port": 443}]}));
    }

    #[test]
    fn diff_marks_changed_lines() {
        let text = unified_diff(Some(&deployment(1, 2)), Some(&deployment(1, 3)), &[]);
        assert!(text.contains("-      \"replicas\": 2"));
        assert!(text.contains("+      \"replicas\": 3"));
        assert!(unified_diff(Some(&deployment(1, 2)), Some(&deployment(1, 2)), &[]).is_empty());
    }
}
