#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use std::fs;
use std::path::Path;

use miette::Diagnostic;
use opschema_core::{CheckConfig, GenConfig};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[error("config error: {message}")]
#[diagnostic(code(opschema::config))]
pub struct ConfigError {
    pub message: String,
}

/// Contents of an `opschema.toml` file: a `[gen]` and a `[check]` table,
/// both optional.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub r#gen: GenConfig,
    pub check: CheckConfig,
}

impl FileConfig {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError {
            message: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|e| ConfigError {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        Self::parse(&raw).map_err(|e| ConfigError {
            message: format!("failed to parse {}: {}", path.display(), e.message),
        })
    }
}
