use std::sync::Arc;
use std::time::Instant;

use crate::auth::{AuthGate, IdentityProvider, JwtValidator};
use crate::config::Settings;
use crate::dispatch::BroadcastDispatcher;
use crate::error::AppError;
use crate::redis::{CircuitBreaker, RedisHealth, RedisPool};
use crate::registry::ConnectionRegistry;
use crate::store::{create_connection_store, ConnectionStore};
use crate::transport::{LocalTransport, RedisRelay, Relay, RelayInbox, RoutingTransport};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub auth_gate: Arc<AuthGate>,
    pub registry: Arc<ConnectionRegistry>,
    /// Outbound queues of the sockets this instance holds
    pub transport: Arc<LocalTransport>,
    /// Receives deliveries relayed by other instances
    pub relay_inbox: Arc<RelayInbox>,
    pub dispatcher: Arc<BroadcastDispatcher>,
    pub redis_pool: Option<Arc<RedisPool>>,
    pub redis_health: Arc<RedisHealth>,
    pub redis_circuit_breaker: Arc<CircuitBreaker>,
    pub start_time: Instant,
}

impl AppState {
    /// Build the long-lived handles from configuration.
    ///
    /// No network I/O happens here; Redis connects lazily on first use.
    pub fn new(settings: Settings) -> Result<Self, AppError> {
        let redis_health = Arc::new(RedisHealth::new());
        let redis_circuit_breaker = Arc::new(CircuitBreaker::new());

        let redis_pool = if settings.store.backend == "redis" {
            Some(Arc::new(RedisPool::new(
                settings.redis.clone(),
                redis_circuit_breaker.clone(),
                redis_health.clone(),
            )?))
        } else {
            None
        };

        let store = create_connection_store(&settings.store, redis_pool.clone());
        let provider: Arc<dyn IdentityProvider> = Arc::new(JwtValidator::new(&settings.jwt));

        // A shared store holds records of sockets owned by other instances
        let relay = redis_pool.as_ref().map(|pool| {
            Arc::new(RedisRelay::new(pool.clone(), settings.relay.channel.clone()))
                as Arc<dyn Relay>
        });

        let mut state = Self::with_relay(settings, provider, store, relay);
        state.redis_pool = redis_pool;
        state.redis_health = redis_health;
        state.redis_circuit_breaker = redis_circuit_breaker;
        Ok(state)
    }

    /// Assemble state around an explicit identity provider and store.
    pub fn with_components(
        settings: Settings,
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn ConnectionStore>,
    ) -> Self {
        Self::with_relay(settings, provider, store, None)
    }

    /// Like [`with_components`](Self::with_components), relaying deliveries
    /// for sockets held by other instances through `relay`.
    pub fn with_relay(
        settings: Settings,
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn ConnectionStore>,
        relay: Option<Arc<dyn Relay>>,
    ) -> Self {
        let instance_id = settings.relay.instance_id.clone();

        let auth_gate = Arc::new(AuthGate::new(
            provider,
            settings.auth.tenant_attribute.clone(),
        ));
        let registry = Arc::new(
            ConnectionRegistry::new(
                store,
                settings.store.connection_ttl(),
                settings.dispatch.page_size,
            )
            .with_instance_id(instance_id.as_str()),
        );
        let transport = Arc::new(LocalTransport::new());
        let relay_inbox = Arc::new(RelayInbox::new(transport.clone(), registry.clone()));
        let routing = Arc::new(RoutingTransport::new(instance_id, transport.clone(), relay));
        let dispatcher = Arc::new(BroadcastDispatcher::new(
            registry.clone(),
            routing,
            &settings.dispatch,
        ));

        Self {
            settings: Arc::new(settings),
            auth_gate,
            registry,
            transport,
            relay_inbox,
            dispatcher,
            redis_pool: None,
            redis_health: Arc::new(RedisHealth::new()),
            redis_circuit_breaker: Arc::new(CircuitBreaker::new()),
            start_time: Instant::now(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ConnectionStore> {
        self.registry.store()
    }

    pub fn instance_id(&self) -> &str {
        self.registry.instance_id()
    }
}
