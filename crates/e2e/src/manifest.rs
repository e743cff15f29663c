//! Extension `package.json` validation

use std::path::Path;

use serde::Deserialize;

use crate::error::{E2eError, E2eResult};

#[derive(Debug, Clone, Deserialize)]
pub struct Engines {
    pub vscode: String,
}

/// The fields of an extension manifest the harness depends on
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    pub name: String,
    pub publisher: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    pub engines: Engines,
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub activation_events: Vec<String>,
}

impl ExtensionManifest {
    /// Load `<extension_path>/package.json`
    pub fn load(extension_path: &Path) -> E2eResult<Self> {
        if !extension_path.is_dir() {
            return Err(E2eError::Launch(format!(
                "extension path does not exist: {}",
                extension_path.display()
            )));
        }

        let manifest_path = extension_path.join("package.json");
        let content = std::fs::read_to_string(&manifest_path).map_err(|e| {
            E2eError::Launch(format!("cannot read {}: {}", manifest_path.display(), e))
        })?;

        let manifest: Self = serde_json::from_str(&content).map_err(|e| {
            E2eError::Launch(format!("invalid extension manifest {}: {}", manifest_path.display(), e))
        })?;

        if manifest.name.trim().is_empty() || manifest.publisher.trim().is_empty() {
            return Err(E2eError::Launch(format!(
                "extension manifest {} needs both name and publisher",
                manifest_path.display()
            )));
        }

        Ok(manifest)
    }

    /// `publisher.name`, the identifier VS Code logs activation under
    pub fn id(&self) -> String {
        format!("{}.{}", self.publisher, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_valid_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{
                "name": "power-platform-developer-suite",
                "displayName": "Power Platform Developer Suite",
                "publisher": "JoshSmithXRM",
                "version": "0.3.0",
                "engines": { "vscode": "^1.85.0" },
                "main": "./dist/extension.js",
                "activationEvents": ["onStartupFinished"]
            }"#,
        )
        .unwrap();

        let manifest = ExtensionManifest::load(dir.path()).unwrap();
        assert_eq!(manifest.id(), "JoshSmithXRM.power-platform-developer-suite");
        assert_eq!(manifest.engines.vscode, "^1.85.0");
        assert_eq!(manifest.activation_events, vec!["onStartupFinished"]);
    }

    #[test]
    fn test_missing_directory_is_launch_error() {
        let err = ExtensionManifest::load(Path::new("/nonexistent/ppds-extension")).unwrap_err();
        assert!(matches!(err, E2eError::Launch(_)));
    }

    #[test]
    fn test_missing_engines_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{ "name": "x", "publisher": "y" }"#,
        )
        .unwrap();

        let err = ExtensionManifest::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("invalid extension manifest"));
    }
}
