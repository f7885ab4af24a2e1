use std::net::SocketAddr;

/// Size limits the core engine does not enforce by default (see DESIGN.md —
/// the open question on unbounded buffered reassembly is preserved: no cap
/// unless the embedder asks for one).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConfig {
    pub max_frame_size: Option<usize>,
    pub max_message_size: Option<usize>,
}

/// Binds a `WsListener` to an address with a `WebSocketConfig` applied to
/// every accepted connection.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub web_socket_config: WebSocketConfig,
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            web_socket_config: WebSocketConfig::default(),
        }
    }

    pub fn with_web_socket_config(mut self, config: WebSocketConfig) -> Self {
        self.web_socket_config = config;
        self
    }
}
