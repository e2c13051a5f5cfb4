//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::persistence::{MissingFilePolicy, PersistenceConfig};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "quill";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DATA_FILE: &str = "data/entries.json";
const DEFAULT_SAVE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_TEMPLATE_DIR: &str = "templates";
const DEFAULT_ASSET_DIR: &str = "static";

/// Command-line arguments for the Quill binary.
#[derive(Debug, Parser)]
#[command(name = "quill", version, about = "Quill blog server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "QUILL_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override how long in-flight requests may take to drain on shutdown.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the path of the entries data file.
    #[arg(long = "data-file", value_name = "PATH")]
    pub data_file: Option<PathBuf>,

    /// What to do when the data file is missing at startup (empty|abort).
    #[arg(long = "missing-data-file", value_name = "POLICY")]
    pub missing_file: Option<String>,

    /// Save the data file after every new entry.
    #[arg(
        long = "save-on-write",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub save_on_write: Option<bool>,

    /// Override the upper bound on a single save.
    #[arg(long = "save-timeout-seconds", value_name = "SECONDS")]
    pub save_timeout_seconds: Option<u64>,

    /// Override the template directory.
    #[arg(long = "templates-directory", value_name = "PATH")]
    pub templates_directory: Option<PathBuf>,

    /// Override the static asset directory.
    #[arg(long = "assets-directory", value_name = "PATH")]
    pub assets_directory: Option<PathBuf>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
    pub templates: TemplateSettings,
    pub assets: AssetSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub data_file: PathBuf,
    pub missing_file: MissingFilePolicy,
    pub save_on_write: bool,
    pub save_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TemplateSettings {
    pub directory: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AssetSettings {
    pub directory: PathBuf,
}

impl From<&StorageSettings> for PersistenceConfig {
    fn from(storage: &StorageSettings) -> Self {
        Self {
            missing_file: storage.missing_file,
            save_on_write: storage.save_on_write,
            save_timeout: storage.save_timeout,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("QUILL").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_serve_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    storage: RawStorageSettings,
    templates: RawTemplateSettings,
    assets: RawAssetSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(path) = overrides.data_file.as_ref() {
            self.storage.data_file = Some(path.clone());
        }
        if let Some(policy) = overrides.missing_file.as_ref() {
            self.storage.missing_file = Some(policy.clone());
        }
        if let Some(enabled) = overrides.save_on_write {
            self.storage.save_on_write = Some(enabled);
        }
        if let Some(seconds) = overrides.save_timeout_seconds {
            self.storage.save_timeout_seconds = Some(seconds);
        }
        if let Some(directory) = overrides.templates_directory.as_ref() {
            self.templates.directory = Some(directory.clone());
        }
        if let Some(directory) = overrides.assets_directory.as_ref() {
            self.assets.directory = Some(directory.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            storage,
            templates,
            assets,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            storage: build_storage_settings(storage)?,
            templates: TemplateSettings {
                directory: non_empty_path(
                    templates.directory,
                    DEFAULT_TEMPLATE_DIR,
                    "templates.directory",
                )?,
            },
            assets: AssetSettings {
                directory: non_empty_path(assets.directory, DEFAULT_ASSET_DIR, "assets.directory")?,
            },
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let data_file = non_empty_path(storage.data_file, DEFAULT_DATA_FILE, "storage.data_file")?;

    let missing_file = match storage.missing_file {
        Some(value) => value
            .parse::<MissingFilePolicy>()
            .map_err(|reason| LoadError::invalid("storage.missing_file", reason))?,
        None => MissingFilePolicy::default(),
    };

    let timeout_secs = storage
        .save_timeout_seconds
        .unwrap_or(DEFAULT_SAVE_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "storage.save_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(StorageSettings {
        data_file,
        missing_file,
        save_on_write: storage.save_on_write.unwrap_or(false),
        save_timeout: Duration::from_secs(timeout_secs),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    data_file: Option<PathBuf>,
    missing_file: Option<String>,
    save_on_write: Option<bool>,
    save_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTemplateSettings {
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAssetSettings {
    directory: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_empty_path(
    value: Option<PathBuf>,
    default: &str,
    key: &'static str,
) -> Result<PathBuf, LoadError> {
    let path = value.unwrap_or_else(|| PathBuf::from(default));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(key, "path must not be empty"));
    }
    Ok(path)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
