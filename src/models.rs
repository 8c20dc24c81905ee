use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};

/// Prefix marking a string attribute as a reference into a secret store.
pub const SECRET_REF_PREFIX: &str = "ref://";

/// Extension key holding a custom readiness expression for watched resources.
pub const HEALTH_POLICY_EXTENSION: &str = "strata.io/health-policy";

/// Extension key overriding the graph category of a resource.
pub const CATEGORY_EXTENSION: &str = "strata.io/category";

/// The runtime family a resource is applied through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    Kubernetes,
    Terraform,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceType::Kubernetes => write!(f, "Kubernetes"),
            ResourceType::Terraform => write!(f, "Terraform"),
        }
    }
}

// ─── Resource ───────────────────────────────────────────────────────────────

/// A single desired (or recorded) resource.
///
/// Ids follow the runtime's convention: Kubernetes ids are
/// `apiVersion:kind[:namespace]:name`, Terraform ids are
/// `providerNamespace:providerName:resourceType:resourceName`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default)]
    pub attributes: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extensions: serde_json::Map<String, Value>,
}

impl Resource {
    pub fn new(id: impl Into<String>, resource_type: ResourceType, attributes: Value) -> Self {
        Self {
            id: id.into(),
            resource_type,
            attributes,
            depends_on: vec![],
            extensions: serde_json::Map::new(),
        }
    }

    pub fn with_depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_extension(mut self, key: &str, value: Value) -> Self {
        self.extensions.insert(key.to_string(), value);
        self
    }

    /// The kind segment of a Kubernetes id, or the resource type segment of
    /// a Terraform id.
    pub fn kind(&self) -> &str {
        let parts: Vec<&str> = self.id.split(':').collect();
        match self.resource_type {
            ResourceType::Kubernetes => parts.get(1).copied().unwrap_or(""),
            ResourceType::Terraform => parts.get(2).copied().unwrap_or(""),
        }
    }

    /// The last id segment.
    pub fn name(&self) -> &str {
        self.id.rsplit(':').next().unwrap_or(&self.id)
    }

    /// Custom readiness expression declared on the resource, if any.
    pub fn health_policy(&self) -> Option<&str> {
        self.extensions
            .get(HEALTH_POLICY_EXTENSION)
            .and_then(|v| v.as_str())
    }

    /// First attribute path holding an unresolved secret reference.
    pub fn secret_reference(&self) -> Option<String> {
        find_secret_ref(&self.attributes, String::new())
    }
}

fn find_secret_ref(value: &Value, path: String) -> Option<String> {
    match value {
        Value::String(s) if s.starts_with(SECRET_REF_PREFIX) => {
            Some(if path.is_empty() { s.clone() } else { path })
        }
        Value::Object(map) => map.iter().find_map(|(k, v)| {
            let child = if path.is_empty() {
                k.clone()
            } else {
                format!("{}.{}", path, k)
            };
            find_secret_ref(v, child)
        }),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, v)| find_secret_ref(v, format!("{}[{}]", path, i))),
        _ => None,
    }
}

/// Split a Terraform resource id into its four segments.
pub fn parse_terraform_id(id: &str) -> Result<TerraformId<'_>> {
    let parts: Vec<&str> = id.split(':').collect();
    if parts.len() != 4 || parts.iter().any(|p| p.is_empty()) {
        return Err(EngineError::Validation(format!(
            "invalid Terraform resource id '{}': expected \
             providerNamespace:providerName:resourceType:resourceName",
            id
        )));
    }
    Ok(TerraformId {
        provider_namespace: parts[0],
        provider_name: parts[1],
        resource_type: parts[2],
        resource_name: parts[3],
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerraformId<'a> {
    pub provider_namespace: &'a str,
    pub provider_name: &'a str,
    pub resource_type: &'a str,
    pub resource_name: &'a str,
}

/// Build the id of a live Kubernetes object from its manifest.
pub fn kubernetes_object_id(object: &Value) -> Option<String> {
    let api_version = object.get("apiVersion")?.as_str()?;
    let kind = object.get("kind")?.as_str()?;
    let metadata = object.get("metadata")?;
    let name = metadata.get("name")?.as_str()?;
    match metadata.get("namespace").and_then(|n| n.as_str()) {
        Some(ns) if !ns.is_empty() => Some(format!("{}:{}:{}:{}", api_version, kind, ns, name)),
        _ => Some(format!("{}:{}:{}", api_version, kind, name)),
    }
}

// ─── Spec & State ───────────────────────────────────────────────────────────

/// Secret store configuration; only its presence matters to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretStore {
    pub provider: String,
    #[serde(default)]
    pub config: serde_json::Map<String, Value>,
}

/// The desired resources for a stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_store: Option<SecretStore>,
}

impl Spec {
    pub fn new(resources: Vec<Resource>) -> Self {
        Self {
            resources,
            secret_store: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }
}

/// The last recorded resources of a stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl State {
    pub fn new(resources: Vec<Resource>) -> Self {
        Self { resources }
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_and_name_follow_id_convention() {
        let deploy = Resource::new("apps/v1:Deployment:default:web", ResourceType::Kubernetes, json!({}));
        assert_eq!(deploy.kind(), "Deployment");
        assert_eq!(deploy.name(), "web");

        let bucket = Resource::new("hashicorp:aws:aws_s3_bucket:assets", ResourceType::Terraform, json!({}));
        assert_eq!(bucket.kind(), "aws_s3_bucket");
        assert_eq!(bucket.name(), "assets");
    }

    #[test]
    fn terraform_id_requires_four_segments() {
        assert!(parse_terraform_id("hashicorp:aws:aws_s3_bucket:assets").is_ok());
        assert!(matches!(
            parse_terraform_id("hashicorp:aws:aws_s3_bucket"),
            Err(EngineError::Validation(_))
        ));
        assert!(parse_terraform_id("a:b::d").is_err());
    }

    #[test]
    fn secret_reference_reports_attribute_path() {
        let r = Resource::new(
            "v1:Secret:default:db",
            ResourceType::Kubernetes,
            json!({"data": {"password": "ref://vault/db#password"}, "items": ["plain"]}),
        );
        assert_eq!(r.secret_reference().as_deref(), Some("data.password"));

        let clean = Resource::new("v1:ConfigMap:default:cfg", ResourceType::Kubernetes, json!({"a": ["b"]}));
        assert!(clean.secret_reference().is_none());
    }

    #[test]
    fn object_id_matches_resource_id_format() {
        let obj = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "default"}
        });
        assert_eq!(kubernetes_object_id(&obj).as_deref(), Some("apps/v1:Deployment:default:web"));

        let cluster_scoped = json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "prod"}});
        assert_eq!(kubernetes_object_id(&cluster_scoped).as_deref(), Some("v1:Namespace:prod"));
    }
}
