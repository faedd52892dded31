mod settings;

pub use settings::{
    ApiConfig, AuthConfig, DispatchConfig, JwtConfig, OtelConfig, RedisConfig, RelayConfig,
    ServerConfig, Settings, StoreConfig,
};
