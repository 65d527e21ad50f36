//! TOML-based configuration file for the server.
//!
//! The file is optional: a missing file means "all defaults".  Example:
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 8080
//! log_level = "info"
//!
//! [session]
//! max_message_size = 10000
//! pong_wait_secs = 60
//! write_wait_secs = 10
//! send_queue_capacity = 256
//!
//! [rooms]
//! retention = "forever"          # or "reap-empty-public"
//! relay_private_rooms = true
//!
//! [bridge]
//! kind = "memory"                # or "relay" with url = "ws://relay:24900"
//!
//! [[users]]
//! id = "3f2a9c4e-0000-4000-8000-000000000001"
//! name = "Taro"
//! username = "taro"
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the TOML file, so a file only
//! needs to mention what it changes.
//!
//! # Users
//!
//! `[[users]]` seeds the in-memory identity directory.  An entry without an
//! `id` is registered through the directory's `create`, which assigns a random
//! UUID; deployments with several instances must give every user a fixed
//! `id` so all instances agree on it.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use roomcast_core::Identity;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::directory::{DirectoryError, IdentityDirectory};
use crate::domain::config::{
    BridgeSettings, RoomPolicy, RoomRetention, ServerConfig, SessionConfig,
};
use crate::infrastructure::directory::{DirectoryUser, MemoryIdentityDirectory};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but makes no sense.
    #[error("invalid config value: {0}")]
    Invalid(String),

    /// The `[[users]]` list could not be loaded into the directory.
    #[error("invalid [[users]] entry: {0}")]
    Users(#[from] DirectoryError),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub rooms: RoomsSection,
    #[serde(default)]
    pub bridge: BridgeSection,
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

/// Listener and logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// IP address to bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port for browser WebSocket connections.
    #[serde(default = "default_port")]
    pub port: u16,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Per-connection limits.  `ping_period` is always nine tenths of
/// `pong_wait_secs`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_pong_wait_secs")]
    pub pong_wait_secs: u64,
    #[serde(default = "default_write_wait_secs")]
    pub write_wait_secs: u64,
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
}

/// Room lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomsSection {
    #[serde(default)]
    pub retention: RoomRetention,
    #[serde(default = "default_true")]
    pub relay_private_rooms: bool,
}

/// Which bridge the server uses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BridgeSection {
    #[default]
    Memory,
    Relay {
        url: String,
    },
}

/// One `[[users]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credential: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_message_size() -> usize {
    10_000
}
fn default_pong_wait_secs() -> u64 {
    60
}
fn default_write_wait_secs() -> u64 {
    10
}
fn default_send_queue_capacity() -> usize {
    256
}
fn default_true() -> bool {
    true
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            pong_wait_secs: default_pong_wait_secs(),
            write_wait_secs: default_write_wait_secs(),
            send_queue_capacity: default_send_queue_capacity(),
        }
    }
}

impl Default for RoomsSection {
    fn default() -> Self {
        Self {
            retention: RoomRetention::default(),
            relay_private_rooms: default_true(),
        }
    }
}

// ── Conversion ────────────────────────────────────────────────────────────────

impl FileConfig {
    /// Builds the runtime [`ServerConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the bind address does not parse or
    /// a duration or capacity is zero.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let ws_bind_addr: SocketAddr = format!("{}:{}", self.server.bind_address, self.server.port)
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(format!(
                    "bind address '{}:{}'",
                    self.server.bind_address, self.server.port
                ))
            })?;
        if self.session.pong_wait_secs == 0 || self.session.write_wait_secs == 0 {
            return Err(ConfigError::Invalid(
                "session waits must be at least one second".to_string(),
            ));
        }
        if self.session.send_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "send_queue_capacity must be positive".to_string(),
            ));
        }

        let session = SessionConfig {
            max_message_size: self.session.max_message_size,
            write_wait: Duration::from_secs(self.session.write_wait_secs),
            send_queue_capacity: self.session.send_queue_capacity,
            ..SessionConfig::default()
        }
        .with_pong_wait(Duration::from_secs(self.session.pong_wait_secs));

        let bridge = match &self.bridge {
            BridgeSection::Memory => BridgeSettings::Memory,
            BridgeSection::Relay { url } => BridgeSettings::Relay { url: url.clone() },
        };

        Ok(ServerConfig {
            ws_bind_addr,
            session,
            rooms: RoomPolicy {
                retention: self.rooms.retention,
                relay_private_rooms: self.rooms.relay_private_rooms,
            },
            bridge,
        })
    }

    /// Builds the in-memory identity directory from `[[users]]`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Users`] if two entries share a username.
    pub fn identity_directory(&self) -> Result<MemoryIdentityDirectory, ConfigError> {
        let directory = MemoryIdentityDirectory::new();
        for entry in &self.users {
            match &entry.id {
                Some(id) => directory.insert(DirectoryUser {
                    identity: Identity::new(id.clone(), entry.name.clone()),
                    username: entry.username.clone(),
                    credential: entry.credential.clone(),
                })?,
                None => {
                    directory.create(&entry.name, &entry.username, &entry.credential)?;
                }
            }
        }
        Ok(directory)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads the config file at `path`, returning [`FileConfig::default`] if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("roomcast-config-test-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_empty_file_matches_runtime_defaults() {
        // Arrange / Act
        let cfg: FileConfig = toml::from_str("").expect("empty TOML is valid");

        // Assert
        assert_eq!(cfg.to_server_config().unwrap(), ServerConfig::default());
        assert!(cfg.users.is_empty());
    }

    #[test]
    fn test_default_log_level_is_info() {
        assert_eq!(ServerSection::default().log_level, "info");
    }

    // ── Parsing ───────────────────────────────────────────────────────────────

    #[test]
    fn test_partial_session_section_keeps_other_defaults() {
        // Arrange
        let toml_str = r#"
[session]
pong_wait_secs = 20
"#;

        // Act
        let cfg: FileConfig = toml::from_str(toml_str).unwrap();
        let runtime = cfg.to_server_config().unwrap();

        // Assert
        assert_eq!(runtime.session.pong_wait, Duration::from_secs(20));
        assert_eq!(runtime.session.ping_period, Duration::from_secs(18));
        assert_eq!(runtime.session.max_message_size, 10_000);
    }

    #[test]
    fn test_relay_bridge_section() {
        let toml_str = r#"
[bridge]
kind = "relay"
url = "ws://10.0.0.2:24900"
"#;
        let cfg: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            cfg.to_server_config().unwrap().bridge,
            BridgeSettings::Relay {
                url: "ws://10.0.0.2:24900".to_string()
            }
        );
    }

    #[test]
    fn test_rooms_section_reap_policy() {
        let toml_str = r#"
[rooms]
retention = "reap-empty-public"
relay_private_rooms = false
"#;
        let cfg: FileConfig = toml::from_str(toml_str).unwrap();
        let rooms = cfg.to_server_config().unwrap().rooms;
        assert_eq!(rooms.retention, RoomRetention::ReapEmptyPublic);
        assert!(!rooms.relay_private_rooms);
    }

    #[test]
    fn test_invalid_bind_address_is_rejected() {
        let mut cfg = FileConfig::default();
        cfg.server.bind_address = "not.an.ip".to_string();
        assert!(matches!(cfg.to_server_config(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_queue_capacity_is_rejected() {
        let mut cfg = FileConfig::default();
        cfg.session.send_queue_capacity = 0;
        assert!(cfg.to_server_config().is_err());
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        let result: Result<FileConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    // ── Users ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_users_seed_identity_directory() {
        // Arrange
        let toml_str = r#"
[[users]]
id = "u1"
name = "Taro"
username = "taro"

[[users]]
name = "Jiro"
username = "jiro"
"#;
        let cfg: FileConfig = toml::from_str(toml_str).unwrap();

        // Act
        let dir = cfg.identity_directory().unwrap();

        // Assert: fixed id kept, missing id generated
        assert_eq!(dir.lookup_by_id("u1").unwrap().unwrap().name, "Taro");
        let jiro = dir.lookup_by_username("jiro").unwrap().unwrap();
        assert!(uuid::Uuid::parse_str(&jiro.id).is_ok());
    }

    #[test]
    fn test_duplicate_usernames_are_rejected() {
        let toml_str = r#"
[[users]]
name = "Taro"
username = "taro"

[[users]]
name = "Taro again"
username = "taro"
"#;
        let cfg: FileConfig = toml::from_str(toml_str).unwrap();
        assert!(matches!(cfg.identity_directory(), Err(ConfigError::Users(_))));
    }

    // ── Files ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_missing_file_yields_defaults() {
        let cfg = load_config(&temp_path("absent.toml")).unwrap();
        assert_eq!(cfg, FileConfig::default());
    }

    #[test]
    fn test_load_config_reads_existing_file() {
        // Arrange
        let path = temp_path("roomcast.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "[server]\nport = 9000\n\n[bridge]\nkind = \"relay\"\nurl = \"ws://relay:24900\"\n",
        )
        .unwrap();

        // Act
        let cfg = load_config(&path).unwrap();

        // Assert
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(
            cfg.bridge,
            BridgeSection::Relay {
                url: "ws://relay:24900".to_string()
            }
        );
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
