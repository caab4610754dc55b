pub mod jwt_secret;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

/// Immutable configuration snapshot. Loaded once at startup, replaced only
/// through [`ConfigHandle::reload`]; components hold the handle, not globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    pub external_jwt: ExternalJwtConfig,
    pub internal_auth: InternalAuthConfig,
    pub gateway: GatewayConfig,
    pub limits: Limits,
    pub cors_origins: Vec<String>,
    pub seq_flush_interval_secs: u64,
    /// Resolved at load time; not read from the config file.
    #[serde(skip)]
    pub db_path: PathBuf,
    #[serde(skip)]
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            jwt: JwtConfig::default(),
            external_jwt: ExternalJwtConfig::default(),
            internal_auth: InternalAuthConfig::default(),
            gateway: GatewayConfig::default(),
            limits: Limits::default(),
            cors_origins: vec!["*".to_string()],
            seq_flush_interval_secs: 5,
            db_path: PathBuf::new(),
            data_dir: PathBuf::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_host: String,
    pub listen_port: u16,
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: 8080,
            shutdown_grace_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// Empty means: generate and persist one under the data dir.
    pub secret: String,
    pub expire_hours: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            expire_hours: 720,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalJwtConfig {
    pub enabled: bool,
    pub secret: String,
    pub issuer: String,
    pub default_platform_id: i32,
    /// Mandatory when enabled: keeps the external id namespace disjoint
    /// from native ids.
    pub id_prefix: String,
}

impl Default for ExternalJwtConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secret: String::new(),
            issuer: "external-system".to_string(),
            default_platform_id: 5,
            id_prefix: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InternalAuthConfig {
    pub enabled: bool,
    pub secret: String,
    /// Empty list allows any service name.
    pub allowed_services: Vec<String>,
    pub max_skew_secs: i64,
}

impl Default for InternalAuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secret: String::new(),
            allowed_services: Vec::new(),
            max_skew_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub pong_wait_secs: u64,
    pub ping_period_secs: u64,
    pub write_wait_secs: u64,
    pub max_message_size: usize,
    pub write_buffer: usize,
    /// Consecutive full-channel enqueues before a session is evicted.
    pub backpressure_evict_threshold: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            pong_wait_secs: 60,
            ping_period_secs: 54,
            write_wait_secs: 10,
            max_message_size: 64 * 1024,
            write_buffer: 256,
            backpressure_evict_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub pull_default: i64,
    pub pull_max: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            pull_default: 20,
            pull_max: 200,
        }
    }
}

/// Shared handle to the current snapshot.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<ArcSwap<Config>>,
}

impl ConfigHandle {
    pub fn create() -> Result<Self> {
        let config = load()?;
        Ok(Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
        })
    }

    pub fn load(&self) -> Arc<Config> {
        self.inner.load_full()
    }

    /// Re-run the loader and swap the snapshot in. In-flight requests keep
    /// the snapshot they already hold.
    pub fn reload(&self) -> Result<()> {
        let config = load()?;
        self.inner.store(Arc::new(config));
        Ok(())
    }

    #[cfg(test)]
    pub fn for_tests(config: Config) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
        }
    }
}

fn data_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("NEXIM_HOME") {
        return Ok(PathBuf::from(home));
    }
    let home = dirs_next::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.join(".nexim"))
}

fn load() -> Result<Config> {
    let data_dir = data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let mut config = read_config_file(&data_dir.join("config.json"))?;
    config.data_dir = data_dir.clone();

    apply_env_overrides(&mut config);

    config.db_path = match std::env::var("NEXIM_DB_PATH") {
        Ok(p) if !p.is_empty() => PathBuf::from(p),
        _ => data_dir.join("nexim.db"),
    };

    if config.jwt.secret.is_empty() {
        config.jwt.secret = jwt_secret::get_or_create_jwt_secret(&data_dir)?;
    }

    validate(&config)?;
    Ok(config)
}

/// Missing file means defaults; an unparsable file is an error so a typo
/// cannot silently drop settings.
fn read_config_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(host) = std::env::var("NEXIM_LISTEN_HOST") {
        if !host.is_empty() {
            config.server.listen_host = host;
        }
    }
    if let Ok(port) = std::env::var("NEXIM_LISTEN_PORT") {
        if let Ok(port) = port.parse() {
            config.server.listen_port = port;
        }
    }
    if let Ok(secret) = std::env::var("NEXIM_JWT_SECRET") {
        if !secret.is_empty() {
            config.jwt.secret = secret;
        }
    }
    if let Ok(secret) = std::env::var("NEXIM_INTERNAL_SECRET") {
        if !secret.is_empty() {
            config.internal_auth.enabled = true;
            config.internal_auth.secret = secret;
        }
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.external_jwt.enabled {
        if config.external_jwt.secret.is_empty() {
            anyhow::bail!("external_jwt.enabled requires external_jwt.secret");
        }
        if config.external_jwt.id_prefix.is_empty() {
            anyhow::bail!(
                "external_jwt.enabled requires external_jwt.id_prefix to keep \
                 external ids out of the native id namespace"
            );
        }
    }
    if config.internal_auth.enabled && config.internal_auth.secret.is_empty() {
        anyhow::bail!("internal_auth.enabled requires internal_auth.secret");
    }
    if config.gateway.ping_period_secs >= config.gateway.pong_wait_secs {
        anyhow::bail!("gateway.ping_period_secs must be below gateway.pong_wait_secs");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recommended_tuning() {
        let c = Config::default();
        assert_eq!(c.gateway.pong_wait_secs, 60);
        assert_eq!(c.gateway.ping_period_secs, 54);
        assert_eq!(c.gateway.write_wait_secs, 10);
        assert_eq!(c.gateway.max_message_size, 64 * 1024);
        assert_eq!(c.gateway.write_buffer, 256);
        assert_eq!(c.server.shutdown_grace_secs, 30);
        assert_eq!(c.internal_auth.max_skew_secs, 300);
    }

    #[test]
    fn external_jwt_requires_prefix() {
        let mut c = Config::default();
        c.external_jwt.enabled = true;
        c.external_jwt.secret = "s".into();
        assert!(validate(&c).is_err());

        c.external_jwt.id_prefix = "ext:".into();
        assert!(validate(&c).is_ok());
    }

    #[test]
    fn partial_config_file_fills_defaults() {
        let c: Config = serde_json::from_str(r#"{"server": {"listen_port": 9000}}"#).unwrap();
        assert_eq!(c.server.listen_port, 9000);
        assert_eq!(c.server.listen_host, "0.0.0.0");
        assert_eq!(c.limits.pull_default, 20);
    }

    #[test]
    fn reload_swaps_the_snapshot() {
        let handle = ConfigHandle::for_tests(Config::default());
        let before = handle.load();
        let mut next = Config::default();
        next.server.listen_port = 9999;
        handle.inner.store(Arc::new(next));
        assert_eq!(before.server.listen_port, 8080);
        assert_eq!(handle.load().server.listen_port, 9999);
    }
}
