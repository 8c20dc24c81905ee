use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

use crate::config::types::EngineSettings;
use crate::models::Spec;

/// File format detected from the extension.
#[derive(Debug, PartialEq)]
pub enum FileFormat {
    Json,
    Yaml,
}

/// Detect the format of a spec or settings file. Anything that is not
/// `.json` is parsed as YAML, which also accepts JSON documents.
pub fn detect_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => FileFormat::Json,
        _ => FileFormat::Yaml,
    }
}

fn load_file<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} file {}", what, path.display()))?;
    parse_content(&content, detect_format(path))
        .with_context(|| format!("Failed to parse {} file {}", what, path.display()))
}

fn parse_content<T: DeserializeOwned>(content: &str, format: FileFormat) -> Result<T> {
    let value = match format {
        FileFormat::Json => serde_json::from_str(content)?,
        FileFormat::Yaml => serde_yaml::from_str(content)?,
    };
    Ok(value)
}

/// Load the desired spec from a YAML or JSON file.
pub fn load_spec(path: &Path) -> Result<Spec> {
    let spec: Spec = load_file(path, "spec")?;
    tracing::info!(path = %path.display(), resources = spec.resources.len(), "Loaded spec");
    Ok(spec)
}

/// Load engine settings. A missing path yields the defaults.
pub fn load_settings(path: Option<&Path>) -> Result<EngineSettings> {
    match path {
        Some(p) => {
            let content = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read settings file {}", p.display()))?;
            if content.trim().is_empty() {
                return Ok(EngineSettings::default());
            }
            parse_settings(&content)
        }
        None => Ok(EngineSettings::default()),
    }
}

/// Parse YAML content into settings.
pub fn parse_settings(content: &str) -> Result<EngineSettings> {
    let settings: EngineSettings =
        serde_yaml::from_str(content).context("Failed to parse engine settings")?;
    Ok(settings)
}
