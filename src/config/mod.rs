use crate::models::{
    BridgeConfig, ConnectPolicy, DecodeRules, DisposalMode, FileType, HealthThresholds, LineConfig,
};
use crate::services::decoder::REQUIRED_XML_FIELDS;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashSet;
use std::fs;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "inspection-bridge.yaml";

/// Environment variables starting with this prefix override file values,
/// e.g. `INSPECTION_BRIDGE__SERVER__ADDRESS=10.0.0.5`
pub const ENV_PREFIX: &str = "INSPECTION_BRIDGE";

const ENV_SEPARATOR: &str = "__";

/// Settings that would make the bridge misbehave. Reported before any line starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No lines configured")]
    NoLines,

    #[error("source.source_dir is not set")]
    MissingSourceDir,

    #[error("source.target_dir is not set (required when dispose is 'move')")]
    MissingTargetDir,

    #[error("source.polling_interval_secs must be at least 1")]
    ZeroPollInterval,

    #[error("Line name is empty")]
    EmptyLineName,

    #[error("Duplicate line name: {0}")]
    DuplicateLine(String),

    #[error("Line {0} has port 0")]
    InvalidPort(String),

    #[error("No {0} pass conditions configured")]
    EmptyPassSet(FileType),

    #[error("xml_mapping is missing required field '{0}'")]
    MissingXmlMapping(&'static str),

    #[error(
        "machine_state.unknown_secs ({unknown}) must be greater than standby_secs ({standby})"
    )]
    InvalidThresholds { standby: u64, unknown: u64 },

    #[error("server.address is not set")]
    MissingAddress,

    #[error("server.connect_attempts must be at least 1")]
    NoConnectAttempts,
}

/// Configuration manager for the bridge's YAML file.
///
/// Loading layers the file under `INSPECTION_BRIDGE__*` environment
/// overrides, then [`validate`] and [`resolve_lines`] turn the result into
/// one immutable [`LineConfig`] per line.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: Utf8PathBuf,
    env_prefix: String,
}

impl ConfigManager {
    pub fn new<P: AsRef<Utf8Path>>(config_path: P) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Read overrides from a different environment prefix
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }

    /// Load the configuration file with environment overrides applied.
    ///
    /// A missing file is an error; run with `--init` to create one.
    pub fn load(&self) -> Result<BridgeConfig> {
        let file_contents = fs::read_to_string(&self.config_path).with_context(|| {
            format!(
                "Failed to read config: {} (create one with --init)",
                self.config_path
            )
        })?;

        let layered = ::config::Config::builder()
            .add_source(::config::File::from_str(
                &file_contents,
                ::config::FileFormat::Yaml,
            ))
            .add_source(
                ::config::Environment::with_prefix(&self.env_prefix)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to parse config: {}", self.config_path))?;

        let config: BridgeConfig = layered
            .try_deserialize()
            .with_context(|| format!("Invalid config: {}", self.config_path))?;

        tracing::info!(
            "Loaded config from {} ({} lines)",
            self.config_path,
            config.lines.len()
        );
        Ok(config)
    }

    /// Load, validate and resolve in one step
    pub fn load_lines(&self) -> Result<Vec<LineConfig>> {
        let config = self.load()?;
        resolve_lines(&config)
    }

    pub fn save(&self, config: &BridgeConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize config to YAML")?;

        if let Some(parent) = self.config_path.parent() {
            if !parent.as_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {}", parent))?;
            }
        }

        fs::write(&self.config_path, yaml_string)
            .with_context(|| format!("Failed to write config: {}", self.config_path))?;

        tracing::info!("Saved config to {}", self.config_path);
        Ok(())
    }

    /// Write [`BridgeConfig::template`], refusing to overwrite an existing file
    pub fn write_template(&self) -> Result<()> {
        if self.config_path.exists() {
            anyhow::bail!(
                "Config file already exists: {} (remove it first to regenerate)",
                self.config_path
            );
        }
        self.save(&BridgeConfig::template())
    }
}

/// Check a loaded configuration for settings no line could run with
pub fn validate(config: &BridgeConfig) -> Result<(), ConfigError> {
    if config.lines.is_empty() {
        return Err(ConfigError::NoLines);
    }
    if config.source.source_dir.trim().is_empty() {
        return Err(ConfigError::MissingSourceDir);
    }
    if config.source.dispose == DisposalMode::Move && config.source.target_dir.trim().is_empty() {
        return Err(ConfigError::MissingTargetDir);
    }
    if config.source.polling_interval_secs == 0 {
        return Err(ConfigError::ZeroPollInterval);
    }
    if config.server.address.trim().is_empty() {
        return Err(ConfigError::MissingAddress);
    }
    if config.server.connect_attempts == 0 {
        return Err(ConfigError::NoConnectAttempts);
    }

    let thresholds = &config.machine_state;
    if thresholds.unknown_secs <= thresholds.standby_secs {
        return Err(ConfigError::InvalidThresholds {
            standby: thresholds.standby_secs,
            unknown: thresholds.unknown_secs,
        });
    }

    let mut names = HashSet::new();
    for line in &config.lines {
        if line.name.trim().is_empty() {
            return Err(ConfigError::EmptyLineName);
        }
        if !names.insert(line.name.as_str()) {
            return Err(ConfigError::DuplicateLine(line.name.clone()));
        }
        if line.port == 0 {
            return Err(ConfigError::InvalidPort(line.name.clone()));
        }
    }

    let uses = |file_type: FileType| config.lines.iter().any(|l| l.file_type == file_type);

    if uses(FileType::Csv) && config.pass_conditions.csv.is_empty() {
        return Err(ConfigError::EmptyPassSet(FileType::Csv));
    }
    if uses(FileType::Xml) {
        if config.pass_conditions.xml.is_empty() {
            return Err(ConfigError::EmptyPassSet(FileType::Xml));
        }
        if let Some(field) = REQUIRED_XML_FIELDS
            .iter()
            .find(|field| !config.xml_mapping.contains_key(**field))
        {
            return Err(ConfigError::MissingXmlMapping(*field));
        }
    }

    Ok(())
}

/// Validate, then build one [`LineConfig`] per configured line.
///
/// Creates each line's target directory when files are moved after delivery.
pub fn resolve_lines(config: &BridgeConfig) -> Result<Vec<LineConfig>> {
    validate(config).context("Invalid configuration")?;

    let source_root = Utf8PathBuf::from(config.source.source_dir.trim());
    let target_root = Utf8PathBuf::from(config.source.target_dir.trim());

    let connect = ConnectPolicy {
        max_attempts: config.server.connect_attempts,
        initial_backoff: Duration::from_secs(config.server.initial_backoff_secs),
        max_backoff: Duration::from_secs(config.server.max_backoff_secs),
        read_timeout: Duration::from_secs(config.server.read_timeout_secs.max(1)),
    };
    let health = HealthThresholds {
        standby: Duration::from_secs(config.machine_state.standby_secs),
        unknown: Duration::from_secs(config.machine_state.unknown_secs),
    };

    let mut lines = Vec::with_capacity(config.lines.len());
    for line in &config.lines {
        let pass_tokens = match line.file_type {
            FileType::Csv => &config.pass_conditions.csv,
            FileType::Xml => &config.pass_conditions.xml,
        };
        let xml_mapping = match line.file_type {
            FileType::Csv => Default::default(),
            FileType::Xml => config.xml_mapping.clone(),
        };

        let resolved = LineConfig {
            name: line.name.clone(),
            file_type: line.file_type,
            source_dir: source_root.join(&line.sub_dir),
            target_dir: target_root.join(&line.sub_dir),
            disposal: config.source.dispose,
            host: config.server.address.trim().to_string(),
            port: line.port,
            poll_interval: Duration::from_secs(config.source.polling_interval_secs),
            rules: DecodeRules {
                pass_tokens: pass_tokens.iter().map(|t| t.trim().to_string()).collect(),
                xml_mapping,
            },
            connect,
            health,
            log_activity: config.source.log_activity,
        };

        if resolved.disposal == DisposalMode::Move && !resolved.target_dir.exists() {
            fs::create_dir_all(&resolved.target_dir).with_context(|| {
                format!(
                    "Failed to create target directory for {}: {}",
                    resolved.name, resolved.target_dir
                )
            })?;
        }

        tracing::debug!(
            "Line {}: {} {} -> {} ({})",
            resolved.name,
            resolved.file_type,
            resolved.source_dir,
            resolved.target_dir,
            resolved.endpoint()
        );
        lines.push(resolved);
    }

    Ok(lines)
}
