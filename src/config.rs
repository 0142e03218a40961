use std::{fs::File, io::BufReader, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{Error, KernelResult};

/// Top-level kernel configuration, loadable from a JSON file. Every field has
/// a default so partial files (including `{}`) are valid.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct KernelConfig {
    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub evaluator: EvaluatorConfig,
}

impl KernelConfig {
    pub fn from_file(path: impl AsRef<Path>) -> KernelResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::Config(format!("failed to open {}: {}", path.display(), e)))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
    }
}

/// Limits for the per-execution-unit context and cursor stacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextConfig {
    #[serde(default = "default_max_scope_depth")]
    pub max_scope_depth: usize,

    #[serde(default = "default_max_cursor_depth")]
    pub max_cursor_depth: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_scope_depth: default_max_scope_depth(),
            max_cursor_depth: default_max_cursor_depth(),
        }
    }
}

/// Limits for expression evaluation. Encoded expressions cross process
/// boundaries, so recursion depth is bounded rather than trusted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluatorConfig {
    #[serde(default = "default_max_expression_depth")]
    pub max_expression_depth: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            max_expression_depth: default_max_expression_depth(),
        }
    }
}

fn default_max_scope_depth() -> usize {
    128
}

fn default_max_cursor_depth() -> usize {
    32
}

fn default_max_expression_depth() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KernelConfig::default();
        assert_eq!(config.context.max_scope_depth, 128);
        assert_eq!(config.context.max_cursor_depth, 32);
        assert_eq!(config.evaluator.max_expression_depth, 64);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: KernelConfig =
            serde_json::from_str(r#"{"context": {"max_scope_depth": 8}}"#).unwrap();
        assert_eq!(config.context.max_scope_depth, 8);
        assert_eq!(config.context.max_cursor_depth, 32);
        assert_eq!(config.evaluator.max_expression_depth, 64);
    }

    #[test]
    fn test_empty_json() {
        let config: KernelConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, KernelConfig::default());
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("kasane-config-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{"evaluator": {"max_expression_depth": 16}}"#).unwrap();
        let config = KernelConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.evaluator.max_expression_depth, 16);
    }

    #[test]
    fn test_from_missing_file() {
        let result = KernelConfig::from_file("/nonexistent/kasane.json");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
