//! Experiment bundles: the variable configs of one experiment together with
//! its serialised stage and prompt content, read from a JSON file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use delib_types::Result;

use crate::config::{extract_variable_definitions, VariableConfig, VariableDefinition};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentBundle {
    #[serde(default)]
    pub variable_configs: Vec<VariableConfig>,
    /// Stage configs, agent prompts and anything else that may reference
    /// variables. Only scanned as text.
    #[serde(default)]
    pub content: Value,
}

impl ExperimentBundle {
    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        let bundle: ExperimentBundle = serde_json::from_str(&json)?;
        tracing::debug!(
            path = %path.display(),
            configs = bundle.variable_configs.len(),
            "Experiment bundle loaded"
        );
        Ok(bundle)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_string_pretty(self)?).await?;
        Ok(())
    }

    /// Content as scanned by the usage analyser. A string is used verbatim;
    /// anything else is its JSON text.
    pub fn content_text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    pub fn variable_definitions(&self) -> Vec<VariableDefinition> {
        extract_variable_definitions(&self.variable_configs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BUNDLE: &str = r#"{
        "variableConfigs": [
            {
                "type": "static",
                "id": "s1",
                "definition": {"name": "topic", "schema": {"type": "string"}},
                "value": "\"energy\""
            }
        ],
        "content": {"stages": [{"prompt": "Talk about {{topic}}"}]}
    }"#;

    #[tokio::test]
    async fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");
        tokio::fs::write(&path, BUNDLE).await.unwrap();

        let bundle = ExperimentBundle::load(&path).await.unwrap();
        assert_eq!(bundle.variable_configs.len(), 1);
        assert_eq!(bundle.variable_configs[0].name(), "topic");
        assert!(bundle.content_text().contains("{{topic}}"));
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bundle.json");
        let bundle: ExperimentBundle = serde_json::from_str(BUNDLE).unwrap();

        bundle.save(&path).await.unwrap();
        assert_eq!(ExperimentBundle::load(&path).await.unwrap(), bundle);
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExperimentBundle::load(&dir.path().join("nope.json")).await.unwrap_err();
        assert!(matches!(err, delib_types::DelibError::Io(_)));
    }

    #[test]
    fn content_text_variants() {
        let mut bundle = ExperimentBundle::default();
        assert_eq!(bundle.content_text(), "");
        bundle.content = json!("raw {{x}}");
        assert_eq!(bundle.content_text(), "raw {{x}}");
        bundle.content = json!({"a": 1});
        assert_eq!(bundle.content_text(), r#"{"a":1}"#);
    }
}
