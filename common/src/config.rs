// Configuration management with layered configuration (defaults, file, env)

use crate::models::SftpAuth;
use crate::queue::nats::NatsConfig;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of environment overrides, e.g. `SINK__SFTP__HOST`
const ENV_PREFIX: &str = "SINK";

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub sftp: SftpConfig,
    pub sink: SinkConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    /// Defaults to the current OS user
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: String,
    /// Only consulted when `password` is empty
    #[serde(default)]
    pub private_key_file: Option<String>,
    /// An empty value disables strict host key checking
    #[serde(default)]
    pub known_hosts_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Defaults to `/home/<username>/`
    #[serde(default)]
    pub destination_folder: Option<String>,
    pub destination_file: String,
    pub roll_count: u64,
    pub staging_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Memory,
    Nats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub kind: QueueKind,
    pub capacity: usize,
    pub fetch_expiry_ms: u64,
    pub nats: NatsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    #[serde(default)]
    pub metrics_port: Option<u16>,
    #[serde(default)]
    pub tracing_endpoint: Option<String>,
}

/// Fully resolved connection parameters for the remote session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub auth: SftpAuth,
    /// `None` disables strict host key checking
    pub known_hosts: Option<PathBuf>,
}

/// Fully resolved batching parameters for the sink engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    pub destination_folder: String,
    pub destination_file: String,
    pub roll_count: u64,
    pub staging_dir: PathBuf,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        Self::load_layered(config_dir.as_ref(), ENV_PREFIX)
    }

    fn load_layered(config_dir: &Path, env_prefix: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // Values stay strings until deserialized, so "007" remains a valid password
            .add_source(Environment::with_prefix(env_prefix).separator("__"));

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.sftp.host.is_empty() {
            return Err("SFTP host cannot be empty".to_string());
        }
        if self.sftp.port == 0 {
            return Err("SFTP port must be greater than 0".to_string());
        }

        if self.sink.roll_count == 0 {
            return Err("Sink roll_count must be greater than 0".to_string());
        }
        if self.sink.destination_file.is_empty() {
            return Err("Sink destination_file cannot be empty".to_string());
        }

        match self.queue.kind {
            QueueKind::Memory => {
                if self.queue.capacity == 0 {
                    return Err("Queue capacity must be greater than 0".to_string());
                }
            }
            QueueKind::Nats => {
                if self.queue.nats.url.is_empty() {
                    return Err("NATS URL cannot be empty".to_string());
                }
                if self.queue.nats.stream_name.is_empty() {
                    return Err("NATS stream_name cannot be empty".to_string());
                }
            }
        }

        Ok(())
    }

    /// Configured username, falling back to the current OS user
    pub fn username(&self) -> String {
        self.sftp
            .username
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(current_user)
    }

    /// Resolve credentials and host key policy.
    ///
    /// A non-empty password selects password authentication; otherwise the
    /// private key file (or `<home>/.ssh/id_rsa`) is used and the known hosts
    /// file defaults to `<home>/.ssh/known_hosts`.
    pub fn connection(&self) -> ConnectionSettings {
        let username = self.username();
        let home = home_dir(&username);

        let (auth, known_hosts) = if self.sftp.password.is_empty() {
            let private_key_path = self
                .sftp
                .private_key_file
                .clone()
                .unwrap_or_else(|| home.join(".ssh").join("id_rsa").display().to_string());
            let known_hosts = self
                .sftp
                .known_hosts_file
                .clone()
                .unwrap_or_else(|| home.join(".ssh").join("known_hosts").display().to_string());
            (
                SftpAuth::SshKey {
                    username,
                    private_key_path,
                },
                known_hosts,
            )
        } else {
            (
                SftpAuth::Password {
                    username,
                    password: self.sftp.password.clone(),
                },
                self.sftp.known_hosts_file.clone().unwrap_or_default(),
            )
        };

        ConnectionSettings {
            host: self.sftp.host.clone(),
            port: self.sftp.port,
            auth,
            known_hosts: Some(known_hosts)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        }
    }

    /// `sftp://user@host:port/folder` of the resolved destination, for logs and traces
    pub fn destination_uri(&self) -> String {
        let folder = self.batch().destination_folder;
        format!(
            "sftp://{}@{}:{}/{}",
            self.username(),
            self.sftp.host,
            self.sftp.port,
            folder.trim_start_matches('/')
        )
    }

    pub fn batch(&self) -> BatchSettings {
        let destination_folder = self
            .sink
            .destination_folder
            .clone()
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| format!("/home/{}/", self.username()));

        BatchSettings {
            destination_folder,
            destination_file: self.sink.destination_file.clone(),
            roll_count: self.sink.roll_count,
            staging_dir: self.sink.staging_dir.clone(),
        }
    }
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}

fn home_dir(username: &str) -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/home").join(username))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sftp: SftpConfig {
                host: "localhost".to_string(),
                port: 22,
                username: None,
                password: String::new(),
                private_key_file: None,
                known_hosts_file: None,
            },
            sink: SinkConfig {
                destination_folder: None,
                destination_file: "sftpsink.csv".to_string(),
                roll_count: 10_000,
                staging_dir: PathBuf::from("/tmp"),
            },
            queue: QueueConfig {
                kind: QueueKind::Memory,
                capacity: 100,
                fetch_expiry_ms: 1000,
                nats: NatsConfig::default(),
            },
            worker: WorkerConfig { backoff_ms: 1000 },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: None,
                tracing_endpoint: None,
            },
        }
    }
}
