use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::line::{DisposalMode, FileType};

/// Bridge configuration as stored in `inspection-bridge.yaml`
///
/// Every section except `lines` has defaults, so a minimal file only needs to
/// name the directories, the server address and the monitored lines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub source: SourceSettings,

    #[serde(default)]
    pub pass_conditions: PassConditions,

    /// Logical field -> element path, optionally suffixed with `[@attribute]`
    #[serde(default)]
    pub xml_mapping: IndexMap<String, String>,

    #[serde(default)]
    pub machine_state: MachineStateSettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub lines: Vec<LineSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    #[serde(default)]
    pub source_dir: String,

    #[serde(default)]
    pub target_dir: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default)]
    pub dispose: DisposalMode,

    #[serde(default = "default_true")]
    pub log_activity: bool,

    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            source_dir: String::new(),
            target_dir: String::new(),
            log_dir: default_log_dir(),
            dispose: DisposalMode::default(),
            log_activity: true,
            polling_interval_secs: default_polling_interval(),
        }
    }
}

/// Result tokens that map to `serialNrState = 0`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassConditions {
    #[serde(default)]
    pub csv: Vec<String>,

    #[serde(default)]
    pub xml: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineStateSettings {
    #[serde(default = "default_standby_secs")]
    pub standby_secs: u64,

    #[serde(default = "default_unknown_secs")]
    pub unknown_secs: u64,
}

impl Default for MachineStateSettings {
    fn default() -> Self {
        Self {
            standby_secs: default_standby_secs(),
            unknown_secs: default_unknown_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: default_address(),
            connect_attempts: default_connect_attempts(),
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

/// One monitored station
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSettings {
    pub name: String,
    pub sub_dir: String,
    pub file_type: FileType,
    pub port: u16,
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_true() -> bool {
    true
}

fn default_polling_interval() -> u64 {
    5
}

fn default_standby_secs() -> u64 {
    600
}

fn default_unknown_secs() -> u64 {
    1800
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    2
}

fn default_max_backoff() -> u64 {
    60
}

fn default_read_timeout() -> u64 {
    5
}

impl BridgeConfig {
    /// Template written by `--init`: two example lines, one per file type
    pub fn template() -> Self {
        let mut xml_mapping = IndexMap::new();
        xml_mapping.insert(
            "inspection_time".to_string(),
            "Header/StartTime".to_string(),
        );
        xml_mapping.insert("event_id".to_string(), "Header[@EventId]".to_string());
        xml_mapping.insert("serial".to_string(), "Panel/Barcode".to_string());
        xml_mapping.insert("result".to_string(), "Panel/Result[@Code]".to_string());

        Self {
            source: SourceSettings {
                source_dir: "C:/SPI/Output".to_string(),
                target_dir: "C:/SPI/Processed".to_string(),
                ..SourceSettings::default()
            },
            pass_conditions: PassConditions {
                csv: vec!["PASS".to_string(), "GOOD".to_string()],
                xml: vec!["0".to_string()],
            },
            xml_mapping,
            machine_state: MachineStateSettings::default(),
            server: ServerSettings::default(),
            lines: vec![
                LineSettings {
                    name: "SPI-1".to_string(),
                    sub_dir: "Line1".to_string(),
                    file_type: FileType::Csv,
                    port: 5001,
                },
                LineSettings {
                    name: "SPI-2".to_string(),
                    sub_dir: "Line2".to_string(),
                    file_type: FileType::Xml,
                    port: 5002,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_yaml() {
        let yaml = r#"
server:
  address: 10.0.0.5
lines:
  - name: SPI-1
    sub_dir: Line1
    file_type: csv
    port: 5001
"#;
        let config: BridgeConfig = serde_yaml_ng::from_str(yaml).unwrap();

        assert_eq!(config.server.address, "10.0.0.5");
        assert_eq!(config.server.connect_attempts, 5);
        assert_eq!(config.server.initial_backoff_secs, 2);
        assert_eq!(config.server.max_backoff_secs, 60);
        assert_eq!(config.machine_state.standby_secs, 600);
        assert_eq!(config.machine_state.unknown_secs, 1800);
        assert_eq!(config.source.polling_interval_secs, 5);
        assert_eq!(config.source.dispose, DisposalMode::Move);
        assert!(config.source.log_activity);
        assert_eq!(config.lines[0].file_type, FileType::Csv);
    }

    #[test]
    fn test_xml_mapping_keeps_order() {
        let config = BridgeConfig::template();
        let keys: Vec<&str> = config.xml_mapping.keys().map(String::as_str).collect();
        assert_eq!(keys, ["inspection_time", "event_id", "serial", "result"]);
    }
}
