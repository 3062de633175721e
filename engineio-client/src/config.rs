use std::collections::HashMap;
use std::time::Duration;

/// The Engine.IO / Socket.IO wire protocol revision.
///
/// Fixed at configuration time (§4.3.1 of the design): detection between v2
/// and v3 only ever happens for operator-facing diagnostics, never to flip
/// the active revision mid-session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    V2,
    V3,
    #[default]
    V4,
}

/// Which transport(s) the engine is allowed to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Start on polling, upgrade to websocket if the server allows it.
    #[default]
    Auto,
    WebSocketOnly,
    PollingOnly,
}

/// Immutable configuration for one [`crate::engine::Engine`].
#[derive(Debug, Clone)]
pub struct EngineIoClientConfig {
    pub url: url::Url,
    pub path: String,
    pub transport: TransportMode,
    pub protocol_version: ProtocolVersion,
    pub connect_timeout: Duration,
    pub ping_interval_override: Option<Duration>,
    pub ping_timeout_override: Option<Duration>,
    pub probe_timeout: Duration,
    pub pongs_missed_max: u8,
    pub extra_headers: HashMap<String, String>,
    pub connect_params: HashMap<String, String>,
    pub allow_self_signed: bool,
    pub max_payload: usize,
}

impl EngineIoClientConfig {
    pub fn builder(url: url::Url) -> EngineIoClientConfigBuilder {
        EngineIoClientConfigBuilder::new(url)
    }
}

/// Builds an [`EngineIoClientConfig`], mirroring the teacher's
/// `EngineIoConfigBuilder` shape.
#[derive(Debug, Clone)]
pub struct EngineIoClientConfigBuilder {
    inner: EngineIoClientConfig,
}

impl EngineIoClientConfigBuilder {
    pub fn new(url: url::Url) -> Self {
        Self {
            inner: EngineIoClientConfig {
                url,
                path: "/socket.io/".to_string(),
                transport: TransportMode::Auto,
                protocol_version: ProtocolVersion::V4,
                connect_timeout: Duration::from_secs(20),
                ping_interval_override: None,
                ping_timeout_override: None,
                probe_timeout: Duration::from_secs(5),
                pongs_missed_max: 2,
                extra_headers: HashMap::new(),
                connect_params: HashMap::new(),
                allow_self_signed: false,
                max_payload: 1_000_000,
            },
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.inner.path = path.into();
        self
    }

    pub fn transport(mut self, transport: TransportMode) -> Self {
        self.inner.transport = transport;
        self
    }

    pub fn protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.inner.protocol_version = version;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.inner.connect_timeout = timeout;
        self
    }

    pub fn ping_interval_override(mut self, interval: Duration) -> Self {
        self.inner.ping_interval_override = Some(interval);
        self
    }

    pub fn ping_timeout_override(mut self, timeout: Duration) -> Self {
        self.inner.ping_timeout_override = Some(timeout);
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.inner.probe_timeout = timeout;
        self
    }

    pub fn pongs_missed_max(mut self, count: u8) -> Self {
        self.inner.pongs_missed_max = count.max(1);
        self
    }

    pub fn extra_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.extra_headers.insert(key.into(), value.into());
        self
    }

    pub fn connect_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.connect_params.insert(key.into(), value.into());
        self
    }

    pub fn allow_self_signed(mut self, allow: bool) -> Self {
        self.inner.allow_self_signed = allow;
        self
    }

    pub fn max_payload(mut self, max_payload: usize) -> Self {
        self.inner.max_payload = max_payload;
        self
    }

    pub fn build(self) -> EngineIoClientConfig {
        self.inner
    }
}
