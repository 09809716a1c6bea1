use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Peer certificate verification mode for TLS listeners.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    #[default]
    None,
    Peer,
    RequirePeerCertificate,
    Once,
}

/// TLS material handed to the Transport. Paths are not read by this crate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    pub ca_path: Option<PathBuf>,
    pub ciphers: Option<String>,
    pub dh_params: Option<PathBuf>,
    pub named_curve: Option<String>,
}

/// Listener and per-request settings of a [`Server`](crate::Server).
///
/// Cloning deep-copies the TLS sub-config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    address: Option<String>,
    port: Option<u16>,
    thread_count: usize,
    backlog: u32,
    compress: bool,
    parse_ssl_info: bool,
    ssl_enabled: bool,
    verify_mode: VerifyMode,
    tls: TlsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: None,
            port: None,
            thread_count: 4,
            backlog: 128,
            compress: true,
            parse_ssl_info: true,
            ssl_enabled: false,
            verify_mode: VerifyMode::None,
            tls: TlsConfig::default(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    pub fn backlog(&self) -> u32 {
        self.backlog
    }

    pub fn compress(&self) -> bool {
        self.compress
    }

    pub fn parse_ssl_info(&self) -> bool {
        self.parse_ssl_info
    }

    pub fn ssl_enabled(&self) -> bool {
        self.ssl_enabled
    }

    pub fn verify_mode(&self) -> VerifyMode {
        self.verify_mode
    }

    pub fn tls(&self) -> &TlsConfig {
        &self.tls
    }

    pub(crate) fn set_listen_address(&mut self, address: &str, port: u16) {
        self.address = Some(address.to_owned());
        self.port = Some(port);
    }
}

/// Consuming builder for [`Config`], starting from the defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    fn new() -> Self {
        Self { config: Config::default() }
    }

    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.address = Some(address.into());
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = Some(port);
        self
    }

    /// Number of Transport worker threads. Values below one are raised to one.
    #[must_use]
    pub fn thread_count(mut self, thread_count: usize) -> Self {
        self.config.thread_count = thread_count.max(1);
        self
    }

    #[must_use]
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.config.backlog = backlog;
        self
    }

    #[must_use]
    pub fn compress(mut self, compress: bool) -> Self {
        self.config.compress = compress;
        self
    }

    #[must_use]
    pub fn parse_ssl_info(mut self, parse_ssl_info: bool) -> Self {
        self.config.parse_ssl_info = parse_ssl_info;
        self
    }

    /// Enables TLS with the given material.
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.ssl_enabled = true;
        self.config.tls = tls;
        self
    }

    #[must_use]
    pub fn verify_mode(mut self, verify_mode: VerifyMode) -> Self {
        self.config.verify_mode = verify_mode;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
