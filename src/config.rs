use serde_derive::Deserialize;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = "config.toml";
const DEFAULT_CUSTOM_NAME: &str = "Growatt ShineX";
const DEFAULT_UPDATE_INTERVAL_MS: u64 = 2_000;
const DEFAULT_MODBUS_LISTEN: &str = "0.0.0.0:5502";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("AccessType {0} is not supported")]
    UnsupportedAccessType(String),
    #[error("config section [{0}] is required")]
    MissingSection(&'static str),
    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// How the inverter output is spread over the grid phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PhaseWiring {
    /// Three-phase when the device reports power on L2.
    #[default]
    Auto,
    Single,
    Three,
}

impl std::str::FromStr for PhaseWiring {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(PhaseWiring::Auto),
            "single" | "1" | "l1" => Ok(PhaseWiring::Single),
            "three" | "3" | "3p" => Ok(PhaseWiring::Three),
            _ => Err(ConfigError::InvalidValue {
                key: "Phase",
                value: value.to_string(),
            }),
        }
    }
}

/// How the ShineX stick is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAccess {
    /// Direct HTTP to the stick on the local network, optional basic auth.
    OnPremise {
        host: String,
        username: String,
        password: String,
    },
}

/// Resolved configuration of the bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub device_instance: u32,
    pub custom_name: String,
    pub position: u8,
    pub phase_wiring: PhaseWiring,
    /// `None` disables the sign-of-life log.
    pub sign_of_life: Option<Duration>,
    pub update_interval: Duration,
    pub access: DeviceAccess,
    /// `None` disables the Modbus gateway.
    pub modbus_listen: Option<SocketAddr>,
}

impl BridgeConfig {
    /// Loads the file named by `SHINEX_CONFIG`, or `config.toml` next to the executable.
    pub fn load() -> Result<Self, ConfigError> {
        let path = match env::var("SHINEX_CONFIG") {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => default_config_path(),
        };
        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut file_config: FileConfig = toml::from_str(&contents)?;
        apply_env_overrides(&mut file_config);
        Self::from_file_config(file_config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Self::from_file_config(toml::from_str(contents)?)
    }

    fn from_file_config(file_config: FileConfig) -> Result<Self, ConfigError> {
        let general = file_config.general;

        let access = match general.access_type.trim() {
            "OnPremise" => {
                let on_premise = file_config
                    .on_premise
                    .ok_or(ConfigError::MissingSection("ONPREMISE"))?;
                if on_premise.host.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key: "Host",
                        value: on_premise.host,
                    });
                }
                DeviceAccess::OnPremise {
                    host: on_premise.host.trim().to_string(),
                    username: on_premise.username.unwrap_or_default(),
                    password: on_premise.password.unwrap_or_default(),
                }
            }
            other => return Err(ConfigError::UnsupportedAccessType(other.to_string())),
        };

        let phase_wiring = general
            .phase
            .as_deref()
            .unwrap_or_default()
            .parse::<PhaseWiring>()?;

        let position = general.position.unwrap_or(0);
        if position > 2 {
            return Err(ConfigError::InvalidValue {
                key: "Position",
                value: position.to_string(),
            });
        }

        let update_interval_ms = general
            .update_interval
            .unwrap_or(DEFAULT_UPDATE_INTERVAL_MS);
        if update_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "UpdateInterval",
                value: "0".to_string(),
            });
        }

        let sign_of_life = match general.sign_of_life_log.unwrap_or(0) {
            0 => None,
            minutes => Some(Duration::from_secs(minutes * 60)),
        };

        let listen = file_config
            .modbus
            .and_then(|modbus| modbus.listen)
            .unwrap_or_else(|| DEFAULT_MODBUS_LISTEN.to_string());
        let modbus_listen = if listen.trim().is_empty() {
            None
        } else {
            Some(
                listen
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "Listen",
                        value: listen.clone(),
                    })?,
            )
        };

        Ok(Self {
            device_instance: general.device_instance,
            custom_name: general
                .custom_name
                .unwrap_or_else(|| DEFAULT_CUSTOM_NAME.to_string()),
            position,
            phase_wiring,
            sign_of_life,
            update_interval: Duration::from_millis(update_interval_ms),
            access,
            modbus_listen,
        })
    }
}

fn default_config_path() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_CONFIG_FILE)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

fn apply_env_overrides(config: &mut FileConfig) {
    let host = env::var("SHINEX_HOST").ok();
    let username = env::var("SHINEX_USERNAME").ok();
    let password = env::var("SHINEX_PASSWORD").ok();
    if host.is_none() && username.is_none() && password.is_none() {
        return;
    }

    let on_premise = config.on_premise.get_or_insert_with(Default::default);
    if let Some(host) = host {
        on_premise.host = host;
    }
    if username.is_some() {
        on_premise.username = username;
    }
    if password.is_some() {
        on_premise.password = password;
    }
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(rename = "DEFAULT")]
    general: FileGeneralConfig,
    #[serde(rename = "ONPREMISE")]
    on_premise: Option<FileOnPremiseConfig>,
    #[serde(rename = "MODBUS")]
    modbus: Option<FileModbusConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileGeneralConfig {
    access_type: String,
    #[serde(rename = "Deviceinstance")]
    device_instance: u32,
    custom_name: Option<String>,
    position: Option<u8>,
    phase: Option<String>,
    sign_of_life_log: Option<u64>,
    update_interval: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileOnPremiseConfig {
    #[serde(default)]
    host: String,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileModbusConfig {
    listen: Option<String>,
}
