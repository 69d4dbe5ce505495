pub mod engine;
pub mod template;

pub use engine::{RuleApplicationReport, RuleContext, RuleEngine};

use crate::errors::WerkbankError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStrategy {
    #[default]
    Copy,
    Symlink,
}

/// Declarative per-project setup step, applied when a worktree is created.
/// Closed set: the engine matches exhaustively, so adding a variant is a
/// compile-time event, not a runtime default branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rule {
    CopyFiles {
        source: String,
        #[serde(default)]
        strategy: CopyStrategy,
        #[serde(default)]
        permissions: Option<u32>,
    },
    SetupCommands {
        command: Vec<String>,
        #[serde(default)]
        environment: HashMap<String, String>,
    },
    Template {
        source: String,
        destination: String,
        #[serde(default)]
        process: bool,
    },
}

impl Rule {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::CopyFiles { .. } => "copy_files",
            Self::SetupCommands { .. } => "setup_commands",
            Self::Template { .. } => "template",
        }
    }
}

/// Validate a rule configuration without applying it. Callable ahead of
/// time by configuration tooling; has no side effects.
pub fn validate_rule_config(
    rule_type: &str,
    config: &serde_json::Value,
) -> Result<(), WerkbankError> {
    let invalid = |message: String| WerkbankError::InvalidRuleConfig {
        rule_type: rule_type.to_string(),
        message,
    };

    match rule_type {
        "copy_files" => {
            let source = config.get("source").and_then(|v| v.as_str());
            if source.is_none_or(str::is_empty) {
                return Err(invalid("'source' is required".to_string()));
            }
            let strategy = config.get("strategy").map(|s| s.as_str());
            match strategy {
                None | Some(Some("copy")) | Some(Some("symlink")) => {}
                _ => {
                    return Err(invalid(
                        "'strategy' must be 'copy' or 'symlink'".to_string(),
                    ));
                }
            }
            if strategy == Some(Some("symlink")) && config.get("permissions").is_some() {
                return Err(invalid(
                    "'permissions' cannot be combined with the symlink strategy".to_string(),
                ));
            }
            Ok(())
        }
        "setup_commands" => {
            let command = config.get("command").and_then(|v| v.as_array());
            match command {
                Some(argv) if !argv.is_empty() => {
                    if argv.iter().any(|v| !v.is_string()) {
                        return Err(invalid("'command' entries must be strings".to_string()));
                    }
                    Ok(())
                }
                _ => Err(invalid("'command' must be a non-empty list".to_string())),
            }
        }
        "template" => {
            for field in ["source", "destination"] {
                if config
                    .get(field)
                    .and_then(|v| v.as_str())
                    .is_none_or(str::is_empty)
                {
                    return Err(invalid(format!("'{field}' is required")));
                }
            }
            Ok(())
        }
        other => Err(WerkbankError::InvalidRuleConfig {
            rule_type: other.to_string(),
            message: "unknown rule type".to_string(),
        }),
    }
}
