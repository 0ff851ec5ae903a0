use crate::error::{Error, Result};
use byte_unit::Byte;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub kv: KvConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Worker count is cores minus this surplus, floored at one
    #[serde(default)]
    pub surplus_processors: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_repository_dir")]
    pub repository_dir: PathBuf,

    #[serde(default = "default_session_dir")]
    pub session_dir: PathBuf,

    #[serde(default = "default_shared_lock_dir")]
    pub shared_lock_dir: PathBuf,

    /// Octal permission string applied to created directories
    #[serde(default = "default_file_permissions")]
    pub file_permissions: String,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: Byte,

    #[serde(default = "default_compression")]
    pub compression: CompressionType,

    #[serde(default = "default_hash_type")]
    pub hash_type: crate::models::HashKind,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KvConfig {
    #[serde(default = "default_kv_mode")]
    pub mode: KvMode,

    /// Session age in seconds after which the sweeper removes it
    #[serde(default = "default_kv_max_seconds")]
    pub max_seconds: u64,

    #[serde(default = "default_kv_file_path")]
    pub file_path: PathBuf,

    #[serde(default = "default_session_table")]
    pub session_table: String,

    #[serde(default = "default_map_table")]
    pub map_table: String,

    #[serde(default = "default_lock_table")]
    pub lock_table: String,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LockConfig {
    /// When false, lock acquisition is a no-op
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_lock_backend")]
    pub backend: LockBackend,

    /// Max seconds to wait for a lock; 0 waits forever
    #[serde(default = "default_lock_timeout")]
    pub timeout_secs: u64,

    /// Settle time before re-checking for a simultaneous peer acquisition
    #[serde(default = "default_second_traversal")]
    pub second_traversal_secs: u64,

    /// Lock records older than this are eligible for sweep
    #[serde(default = "default_lock_max_age")]
    pub max_age_secs: u64,
}

#[derive(Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_subject")]
    pub jwt_subject: String,

    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    #[serde(default = "default_jwt_algorithm")]
    pub jwt_algorithm: String,

    /// Token lifetime in seconds
    #[serde(default = "default_jwt_duration")]
    pub jwt_duration_secs: i64,

    /// Development escape hatch: a literal token value that always validates
    #[serde(default)]
    pub bypass_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KvMode {
    Sqlite,
    Redis,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    Soft,
    Ternary,
    Redis,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    Gzip,
    Zip,
    Bzip2,
    Lzma,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_repository_dir() -> PathBuf {
    PathBuf::from("data/repository")
}

fn default_session_dir() -> PathBuf {
    PathBuf::from("data/sessions")
}

fn default_shared_lock_dir() -> PathBuf {
    PathBuf::from("data/shared-locks")
}

fn default_file_permissions() -> String {
    "755".to_string()
}

fn default_chunk_size() -> Byte {
    Byte::from_u64_with_unit(8, byte_unit::Unit::MiB).unwrap()
}

fn default_compression() -> CompressionType {
    CompressionType::Gzip
}

fn default_hash_type() -> crate::models::HashKind {
    crate::models::HashKind::MD5
}

fn default_kv_mode() -> KvMode {
    KvMode::Sqlite
}

fn default_kv_max_seconds() -> u64 {
    // one day
    86400
}

fn default_kv_file_path() -> PathBuf {
    PathBuf::from("data/kv.sqlite")
}

fn default_session_table() -> String {
    "sessions".to_string()
}

fn default_map_table() -> String {
    "map".to_string()
}

fn default_lock_table() -> String {
    "locks".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost".to_string()
}

fn default_true() -> bool {
    true
}

fn default_lock_backend() -> LockBackend {
    LockBackend::Soft
}

fn default_lock_timeout() -> u64 {
    60
}

fn default_second_traversal() -> u64 {
    5
}

fn default_lock_max_age() -> u64 {
    60
}

fn default_jwt_subject() -> String {
    "aW4gYSBob2xlIGluIHRoZSBncm91bmQ".to_string()
}

fn default_jwt_secret() -> String {
    "dGhlcmUgbGl2ZWQgYSBob2JiaXQ".to_string()
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

fn default_jwt_duration() -> i64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_host(),
            port: default_port(),
            surplus_processors: 0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            repository_dir: default_repository_dir(),
            session_dir: default_session_dir(),
            shared_lock_dir: default_shared_lock_dir(),
            file_permissions: default_file_permissions(),
            chunk_size: default_chunk_size(),
            compression: default_compression(),
            hash_type: default_hash_type(),
        }
    }
}

impl Default for KvConfig {
    fn default() -> Self {
        KvConfig {
            mode: default_kv_mode(),
            max_seconds: default_kv_max_seconds(),
            file_path: default_kv_file_path(),
            session_table: default_session_table(),
            map_table: default_map_table(),
            lock_table: default_lock_table(),
            redis_url: default_redis_url(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            enabled: true,
            backend: default_lock_backend(),
            timeout_secs: default_lock_timeout(),
            second_traversal_secs: default_second_traversal(),
            max_age_secs: default_lock_max_age(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            jwt_subject: default_jwt_subject(),
            jwt_secret: default_jwt_secret(),
            jwt_algorithm: default_jwt_algorithm(),
            jwt_duration_secs: default_jwt_duration(),
            bypass_token: None,
        }
    }
}

const JWT_ALGORITHMS: &[&str] = &["HS256", "HS384", "HS512"];

impl Config {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if config_path.is_none() {
            // Release builds: look in /etc/depo-file-repo/
            #[cfg(not(debug_assertions))]
            {
                builder = builder.add_source(
                    config::File::with_name("/etc/depo-file-repo/config").required(false),
                );
            }

            // Debug builds: look in current working directory
            #[cfg(debug_assertions)]
            {
                builder = builder.add_source(config::File::with_name("config").required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(
                config::File::with_name(path)
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        }

        // Environment variables (highest precedence)
        builder = builder.add_source(config::Environment::with_prefix("DEPO_REPO").separator("__"));

        let config = builder.build().map_err(|e| Error::Config {
            msg: format!("Failed to load configuration: {}", e),
        })?;

        let mut config: Self = config.try_deserialize().map_err(|e| Error::Config {
            msg: format!("Failed to deserialize configuration: {}", e),
        })?;

        config.absolutize_paths()?;
        config.validate()?;

        Ok(config)
    }

    /// Convert relative directory settings to absolute paths rooted at the
    /// working directory
    pub fn absolutize_paths(&mut self) -> Result<()> {
        let cwd = std::env::current_dir().map_err(|e| Error::Config {
            msg: format!("Failed to get current directory: {}", e),
        })?;
        for path in [
            &mut self.storage.repository_dir,
            &mut self.storage.session_dir,
            &mut self.storage.shared_lock_dir,
            &mut self.kv.file_path,
        ] {
            if !path.is_absolute() {
                *path = cwd.join(&**path);
            }
            if let Ok(canonical) = path.canonicalize() {
                *path = canonical;
            }
        }
        Ok(())
    }

    /// Startup validation: reject inconsistent or out-of-range settings before
    /// any component is constructed
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(Error::Config {
                msg: "server.host must not be empty".to_string(),
            });
        }
        for (name, path) in [
            ("storage.repository_dir", &self.storage.repository_dir),
            ("storage.session_dir", &self.storage.session_dir),
            ("storage.shared_lock_dir", &self.storage.shared_lock_dir),
            ("kv.file_path", &self.kv.file_path),
        ] {
            if path.as_os_str().is_empty() {
                return Err(Error::Config {
                    msg: format!("{} must not be empty", name),
                });
            }
        }
        if self.storage.chunk_size.as_u64() == 0 {
            return Err(Error::Config {
                msg: "storage.chunk_size must be positive".to_string(),
            });
        }
        if self.dir_mode().is_err() {
            return Err(Error::Config {
                msg: format!(
                    "storage.file_permissions is not an octal mode: {}",
                    self.storage.file_permissions
                ),
            });
        }
        // The KV-backed lock shares state with the KV store, so both must
        // point at the same backend
        let kv_redis = self.kv.mode == KvMode::Redis;
        let lock_redis = self.lock.backend == LockBackend::Redis;
        if kv_redis != lock_redis {
            return Err(Error::Config {
                msg: "lock.backend = redis requires kv.mode = redis and vice versa".to_string(),
            });
        }
        for (name, table) in [
            ("kv.session_table", &self.kv.session_table),
            ("kv.map_table", &self.kv.map_table),
            ("kv.lock_table", &self.kv.lock_table),
        ] {
            if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(Error::Config {
                    msg: format!("{} must be a bare identifier", name),
                });
            }
        }
        if self.auth.jwt_subject.is_empty() || self.auth.jwt_secret.is_empty() {
            return Err(Error::Config {
                msg: "auth.jwt_subject and auth.jwt_secret must be set".to_string(),
            });
        }
        if !JWT_ALGORITHMS.contains(&self.auth.jwt_algorithm.as_str()) {
            return Err(Error::Config {
                msg: format!("unsupported auth.jwt_algorithm: {}", self.auth.jwt_algorithm),
            });
        }
        if self.auth.jwt_duration_secs < 0 {
            return Err(Error::Config {
                msg: "auth.jwt_duration_secs must be non-negative".to_string(),
            });
        }
        Ok(())
    }

    /// Directory mode parsed from the octal permission string
    pub fn dir_mode(&self) -> Result<u32> {
        u32::from_str_radix(&self.storage.file_permissions, 8).map_err(|_| Error::Config {
            msg: format!(
                "invalid octal permission string: {}",
                self.storage.file_permissions
            ),
        })
    }
}

// Avoid leaking the JWT secret through startup config logging
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_subject", &self.jwt_subject)
            .field("jwt_secret", &"<redacted>")
            .field("jwt_algorithm", &self.jwt_algorithm)
            .field("jwt_duration_secs", &self.jwt_duration_secs)
            .field("bypass_token", &self.bypass_token.as_ref().map(|_| "<set>"))
            .finish()
    }
}
