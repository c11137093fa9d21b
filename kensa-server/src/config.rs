use kensa_core::{Revision, ValidatorOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server configuration loaded from YAML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub log: LogSettings,
    pub validation: ValidationSettings,
    pub definitions: DefinitionSettings,
    pub terminology: TerminologySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body, in bytes
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    /// Emit one JSON object per event instead of plain text
    pub json: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    /// Revision used when a request does not name one
    pub revision: Revision,
    #[serde(flatten)]
    pub options: ValidatorOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefinitionSettings {
    /// Extra structure definition files merged over the embedded tables
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminologySettings {
    /// `ValueSet` resources added to the built-in value sets
    pub value_sets_dir: Option<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = if let Some(path) = config_path {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `KENSA_*` overrides read through `var`.
    pub fn apply_env(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(port) = var("KENSA_PORT")
            && let Ok(port_num) = port.parse()
        {
            self.server.port = port_num;
        }

        if let Some(host) = var("KENSA_HOST") {
            self.server.host = host;
        }

        if let Some(revision) = var("KENSA_REVISION") {
            self.validation.revision = revision.parse()?;
        }

        if let Some(dir) = var("KENSA_DEFINITIONS_DIR") {
            self.definitions.dir = Some(PathBuf::from(dir));
        }

        if let Some(dir) = var("KENSA_VALUE_SETS_DIR") {
            self.terminology.value_sets_dir = Some(PathBuf::from(dir));
        }

        if let Some(level) = var("KENSA_LOG") {
            self.log.level = level;
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
