use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Identity attribute that carries the restaurant id
    #[serde(default = "default_tenant_attribute")]
    pub tenant_attribute: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// "memory" or "redis"
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Advisory connection lifetime in seconds, 0 disables expiry
    #[serde(default = "default_connection_ttl")]
    pub connection_ttl_seconds: u64,
    /// How often expired records are purged from backends without native TTL
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Body field holding the addressed restaurant id
    #[serde(default = "default_tenant_field")]
    pub tenant_field: String,
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_broadcast_timeout_ms")]
    pub broadcast_timeout_ms: u64,
    /// Connections fetched from the store per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

/// Cross-instance delivery for shared stores
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Identifies this process in the connection records it writes
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
    /// Pub/sub channel prefix; each instance listens on `{channel}:{instance_id}`
    #[serde(default = "default_relay_channel")]
    pub channel: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_tenant_attribute() -> String {
    "custom:restaurant_id".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_store_backend() -> String {
    "memory".to_string()
}

fn default_key_prefix() -> String {
    "orders:connections".to_string()
}

fn default_connection_ttl() -> u64 {
    7200 // 2 hours
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_tenant_field() -> String {
    "restaurant_id".to_string()
}

fn default_max_concurrent_sends() -> usize {
    100
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_broadcast_timeout_ms() -> u64 {
    25_000
}

fn default_page_size() -> usize {
    500
}

fn default_instance_id() -> String {
    format!("orders-{}", Uuid::new_v4().simple())
}

fn default_relay_channel() -> String {
    "orders:relay".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "order-notification-service".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8081)?
            .set_default("redis.url", "redis://localhost:6379")?
            .set_default("store.backend", "memory")?
            .set_default("store.connection_ttl_seconds", 7200)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(environment());

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// SERVER__PORT, JWT__SECRET, STORE__BACKEND, DISPATCH__PAGE_SIZE, ...
///
/// Keys contain single underscores, so sections are split on a double one.
fn environment() -> Environment {
    Environment::default().separator("__").try_parsing(true)
}

impl StoreConfig {
    pub fn connection_ttl(&self) -> Option<Duration> {
        match self.connection_ttl_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl DispatchConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tenant_attribute: default_tenant_attribute(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            key_prefix: default_key_prefix(),
            connection_ttl_seconds: default_connection_ttl(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tenant_field: default_tenant_field(),
            max_concurrent_sends: default_max_concurrent_sends(),
            send_timeout_ms: default_send_timeout_ms(),
            broadcast_timeout_ms: default_broadcast_timeout_ms(),
            page_size: default_page_size(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            channel: default_relay_channel(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8081);

        let auth = AuthConfig::default();
        assert_eq!(auth.tenant_attribute, "custom:restaurant_id");

        let dispatch = DispatchConfig::default();
        assert_eq!(dispatch.tenant_field, "restaurant_id");
        assert_eq!(dispatch.send_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_instance_ids_are_unique() {
        let a = RelayConfig::default();
        let b = RelayConfig::default();
        assert_ne!(a.instance_id, b.instance_id);
        assert_eq!(a.channel, "orders:relay");
    }

    #[test]
    fn test_loads_from_environment() {
        env::set_var("JWT__SECRET", "from-env");
        env::set_var("DISPATCH__PAGE_SIZE", "25");
        env::set_var("STORE__CONNECTION_TTL_SECONDS", "90");
        env::set_var("RELAY__INSTANCE_ID", "orders-a");

        let settings = Settings::new();

        for key in [
            "JWT__SECRET",
            "DISPATCH__PAGE_SIZE",
            "STORE__CONNECTION_TTL_SECONDS",
            "RELAY__INSTANCE_ID",
        ] {
            env::remove_var(key);
        }

        let settings = settings.unwrap();
        assert_eq!(settings.jwt.secret, "from-env");
        assert_eq!(settings.dispatch.page_size, 25);
        assert_eq!(settings.store.connection_ttl(), Some(Duration::from_secs(90)));
        assert_eq!(settings.relay.instance_id, "orders-a");
        assert_eq!(settings.server.port, 8081);
    }

    #[test]
    fn test_zero_ttl_disables_expiry() {
        let mut store = StoreConfig::default();
        assert_eq!(store.connection_ttl(), Some(Duration::from_secs(7200)));

        store.connection_ttl_seconds = 0;
        assert_eq!(store.connection_ttl(), None);
    }
}
