use crate::extensions::ExtensionFactory;
use rustls::ServerConfig as RustlsConfig;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub web_socket_config: Option<WebSocketConfig>,
    pub tls_config: Option<Arc<RustlsConfig>>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub web_socket_config: WebSocketConfig,
    /// Extra headers appended to the upgrade request after the mandatory
    /// ones. The caller has the final say: a header listed here replaces the
    /// generated value of the same name.
    pub additional_headers: Vec<(String, String)>,
    pub ca_file: Option<String>,
}

#[derive(Clone)]
pub struct WebSocketConfig {
    pub max_frame_size: Option<usize>,
    pub max_message_size: Option<usize>,
    /// Liveness interval. When set, the connection pings the peer every
    /// interval and drops the connection with 1001 after two consecutive
    /// unanswered pings. Servers default to 30 seconds, clients to off.
    pub auto_ping: Option<Duration>,
    /// Ordered extension factories consulted during the upgrade. Outbound
    /// frames pass the instantiated extensions in list order, inbound frames
    /// in reverse.
    pub extensions: Vec<Arc<dyn ExtensionFactory>>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            max_frame_size: Some(16 << 10),
            max_message_size: Some(64 << 20),
            auto_ping: None,
            extensions: Vec::new(),
        }
    }
}

impl WebSocketConfig {
    /// The server-side default, which keeps auto-ping on so half-dead
    /// clients get reaped.
    pub fn server_default() -> Self {
        WebSocketConfig {
            auto_ping: Some(Duration::from_secs(30)),
            ..Default::default()
        }
    }
}

impl fmt::Debug for WebSocketConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketConfig")
            .field("max_frame_size", &self.max_frame_size)
            .field("max_message_size", &self.max_message_size)
            .field("auto_ping", &self.auto_ping)
            .field(
                "extensions",
                &self
                    .extensions
                    .iter()
                    .map(|extension| extension.name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
