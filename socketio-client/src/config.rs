//! Client-level configuration (§6), layered on top of
//! [`engineio_client::EngineIoClientConfig`].

use std::time::Duration;

use engineio_client::{EngineIoClientConfig, ProtocolVersion, TransportMode};
use serde_json::Value;

/// Immutable configuration for one [`crate::client::Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub engine: EngineIoClientConfig,
    pub namespace: String,
    pub reconnection_enabled: bool,
    pub reconnection_attempts: u32,
    pub reconnection_delay: Duration,
    pub reconnection_delay_max: Duration,
    pub randomization_factor: f64,
    pub auth: Option<Value>,
    pub force_new: bool,
}

impl ClientConfig {
    pub fn builder(url: url::Url) -> ClientConfigBuilder {
        ClientConfigBuilder::new(url)
    }
}

/// Builds a [`ClientConfig`], mirroring [`engineio_client::EngineIoClientConfigBuilder`]'s shape.
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    engine: engineio_client::EngineIoClientConfigBuilder,
    namespace: String,
    reconnection_enabled: bool,
    reconnection_attempts: u32,
    reconnection_delay: Duration,
    reconnection_delay_max: Duration,
    randomization_factor: f64,
    auth: Option<Value>,
    force_new: bool,
}

impl ClientConfigBuilder {
    pub fn new(url: url::Url) -> Self {
        Self {
            engine: EngineIoClientConfig::builder(url),
            namespace: "/".to_string(),
            reconnection_enabled: true,
            reconnection_attempts: 0,
            reconnection_delay: Duration::from_secs(1),
            reconnection_delay_max: Duration::from_secs(5),
            randomization_factor: 0.5,
            auth: None,
            force_new: false,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.engine = self.engine.path(path);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn transport(mut self, transport: TransportMode) -> Self {
        self.engine = self.engine.transport(transport);
        self
    }

    pub fn protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.engine = self.engine.protocol_version(version);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.engine = self.engine.connect_timeout(timeout);
        self
    }

    pub fn ping_interval_override(mut self, interval: Duration) -> Self {
        self.engine = self.engine.ping_interval_override(interval);
        self
    }

    pub fn ping_timeout_override(mut self, timeout: Duration) -> Self {
        self.engine = self.engine.ping_timeout_override(timeout);
        self
    }

    pub fn reconnection_enabled(mut self, enabled: bool) -> Self {
        self.reconnection_enabled = enabled;
        self
    }

    pub fn reconnection_attempts(mut self, attempts: u32) -> Self {
        self.reconnection_attempts = attempts;
        self
    }

    pub fn reconnection_delay(mut self, delay: Duration) -> Self {
        self.reconnection_delay = delay;
        self
    }

    pub fn reconnection_delay_max(mut self, delay: Duration) -> Self {
        self.reconnection_delay_max = delay;
        self
    }

    pub fn randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor.clamp(0.0, 1.0);
        self
    }

    pub fn extra_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.engine = self.engine.extra_header(key, value);
        self
    }

    pub fn connect_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.engine = self.engine.connect_param(key, value);
        self
    }

    pub fn auth(mut self, auth: Value) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn allow_self_signed(mut self, allow: bool) -> Self {
        self.engine = self.engine.allow_self_signed(allow);
        self
    }

    pub fn force_new(mut self, force: bool) -> Self {
        self.force_new = force;
        self
    }

    pub fn build(self) -> ClientConfig {
        ClientConfig {
            engine: self.engine.build(),
            namespace: self.namespace,
            reconnection_enabled: self.reconnection_enabled,
            reconnection_attempts: self.reconnection_attempts,
            reconnection_delay: self.reconnection_delay,
            reconnection_delay_max: self.reconnection_delay_max,
            randomization_factor: self.randomization_factor,
            auth: self.auth,
            force_new: self.force_new,
        }
    }
}
