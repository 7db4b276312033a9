//! Stack configuration.

use crate::error::{Result, StackError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File extension of the main store file.
const STORE_EXTENSION: &str = "store";

/// Behavioral options of a stack instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackOptions {
    /// Strip module paths from entity names derived from Rust types.
    pub normalize_entity_names: bool,

    /// Delete the store files and retry once if the store cannot be opened.
    pub clear_store_on_open_failure: bool,
}

impl Default for StackOptions {
    fn default() -> Self {
        Self {
            normalize_entity_names: true,
            clear_store_on_open_failure: false,
        }
    }
}

/// Describes one stack instance: where the model and store live.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    /// Path to the JSON model description.
    pub model_path: PathBuf,

    /// Directory holding the store file and its sibling files.
    pub store_directory: PathBuf,

    /// Stable storage identifier, used as the file name prefix.
    pub store_identifier: String,

    /// Option flags.
    #[serde(default)]
    pub options: StackOptions,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("./model.json"),
            store_directory: PathBuf::from("./data"),
            store_identifier: "objstack".to_string(),
            options: StackOptions::default(),
        }
    }
}

impl StackConfig {
    /// Create a config with default options.
    pub fn new(
        model_path: impl Into<PathBuf>,
        store_directory: impl Into<PathBuf>,
        store_identifier: impl Into<String>,
    ) -> Self {
        Self {
            model_path: model_path.into(),
            store_directory: store_directory.into(),
            store_identifier: store_identifier.into(),
            options: StackOptions::default(),
        }
    }

    /// Replace the option flags.
    pub fn with_options(mut self, options: StackOptions) -> Self {
        self.options = options;
        self
    }

    /// Load a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read(path.as_ref())?;
        let config: StackConfig = serde_json::from_slice(&data)
            .map_err(|e| StackError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the fields that cannot be defaulted sensibly.
    pub fn validate(&self) -> Result<()> {
        if self.store_identifier.is_empty() {
            return Err(StackError::Config("store identifier must not be empty".into()));
        }
        if self.store_identifier.contains(std::path::is_separator) {
            return Err(StackError::Config(format!(
                "store identifier must be a plain file name: {}",
                self.store_identifier
            )));
        }
        Ok(())
    }

    /// Location of the main store file.
    pub fn database_path(&self) -> PathBuf {
        self.store_directory
            .join(format!("{}.{}", self.store_identifier, STORE_EXTENSION))
    }

    /// Sibling file sharing the store prefix (`<identifier>.<suffix>`).
    pub(crate) fn sibling_path(&self, suffix: &str) -> PathBuf {
        self.store_directory
            .join(format!("{}.{}", self.store_identifier, suffix))
    }
}
