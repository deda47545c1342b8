//! Ambient configuration for both the server and client cores, mirroring
//! `RpcConfig` from the original design with a builder in the same
//! chainable style as `RpcServerBuilder`.

use crate::context::SerializationFormat;

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub default_timeout_ms: u32,
    pub max_retries: u32,
    pub max_concurrent_calls: u32,
    pub call_history_size: u32,
    pub default_format: SerializationFormat,
    pub enable_compression: bool,
    pub enable_encryption: bool,
    pub enable_metrics: bool,
    pub heartbeat_interval_ms: u32,
    pub connection_pool_size: u32,
    /// Maximum frame size (header + payload) accepted on the wire before the
    /// connection is closed as a format error.
    pub max_frame_bytes: u32,
    /// Per-connection in-flight request window before further frames are
    /// buffered instead of dispatched.
    pub in_flight_window: usize,
    /// Port the Prometheus `/metrics` + `/health` endpoint listens on.
    pub exporter_port: u16,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5000,
            max_retries: 3,
            max_concurrent_calls: 1000,
            call_history_size: 10_000,
            default_format: SerializationFormat::Json,
            enable_compression: false,
            enable_encryption: false,
            enable_metrics: true,
            heartbeat_interval_ms: 30_000,
            connection_pool_size: 10,
            max_frame_bytes: 1024 * 1024,
            in_flight_window: 64,
            exporter_port: 9090,
        }
    }
}

impl RpcConfig {
    pub fn builder() -> RpcConfigBuilder {
        RpcConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct RpcConfigBuilder {
    config: RpcConfig,
}

impl RpcConfigBuilder {
    pub fn default_timeout_ms(mut self, value: u32) -> Self {
        self.config.default_timeout_ms = value;
        self
    }

    pub fn max_retries(mut self, value: u32) -> Self {
        self.config.max_retries = value;
        self
    }

    pub fn max_concurrent_calls(mut self, value: u32) -> Self {
        self.config.max_concurrent_calls = value;
        self
    }

    pub fn default_format(mut self, value: SerializationFormat) -> Self {
        self.config.default_format = value;
        self
    }

    pub fn enable_metrics(mut self, value: bool) -> Self {
        self.config.enable_metrics = value;
        self
    }

    pub fn heartbeat_interval_ms(mut self, value: u32) -> Self {
        self.config.heartbeat_interval_ms = value;
        self
    }

    pub fn max_frame_bytes(mut self, value: u32) -> Self {
        self.config.max_frame_bytes = value;
        self
    }

    pub fn in_flight_window(mut self, value: usize) -> Self {
        self.config.in_flight_window = value;
        self
    }

    pub fn exporter_port(mut self, value: u16) -> Self {
        self.config.exporter_port = value;
        self
    }

    pub fn build(self) -> RpcConfig {
        self.config
    }
}
