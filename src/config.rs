use std::net::SocketAddr;
use std::path::PathBuf;
use anyhow::bail;
use hyper::header::HeaderValue;
use rustc_hash::FxHashMap;
use crate::transport::config::TransportConfig;

pub const DEFAULT_RELAY_ADDR: SocketAddr = SocketAddr::V4(std::net::SocketAddrV4::new(std::net::Ipv4Addr::LOCALHOST, 3000));

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// created if it does not exist; existing content is served
    pub root_dir: PathBuf,
    /// request path -> redirect target (absolute URL or path)
    pub redirects: FxHashMap<String, String>,
    pub transport: TransportConfig,
}

impl ServerConfig {
    pub fn new(relay_addr: SocketAddr) -> ServerConfig {
        ServerConfig {
            port: 8080,
            root_dir: PathBuf::from("Data"),
            redirects: Default::default(),
            transport: TransportConfig::new(relay_addr),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (path, target) in &self.redirects {
            if !path.starts_with('/') {
                bail!("redirected path {:?} must start with '/'", path);
            }
            if target.is_empty() {
                bail!("redirect target for {:?} is empty", path);
            }
            if HeaderValue::from_str(target).is_err() {
                bail!("redirect target {:?} cannot be sent as a Location header", target);
            }
        }
        self.transport.validate()
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub transport: TransportConfig,
    /// a response redirecting more often than this is an error
    pub max_redirects: usize,
}

impl ClientConfig {
    pub fn new(relay_addr: SocketAddr) -> ClientConfig {
        ClientConfig {
            transport: TransportConfig::new(relay_addr),
            max_redirects: 5,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.transport.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let server = ServerConfig::new(DEFAULT_RELAY_ADDR);
        assert_eq!(server.port, 8080);
        assert_eq!(server.root_dir, PathBuf::from("Data"));
        assert!(server.validate().is_ok());

        let client = ClientConfig::new(DEFAULT_RELAY_ADDR);
        assert_eq!(client.max_redirects, 5);
        assert!(client.validate().is_ok());
    }

    #[test]
    fn test_relative_redirect_source_is_rejected() {
        let mut config = ServerConfig::new(DEFAULT_RELAY_ADDR);
        config.redirects.insert("a.txt".to_string(), "/b.txt".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redirect_target_with_control_characters_is_rejected() {
        let mut config = ServerConfig::new(DEFAULT_RELAY_ADDR);
        config.redirects.insert("/a.txt".to_string(), "/b.txt\r\nX-Injected: 1".to_string());
        assert!(config.validate().is_err());

        config.redirects.insert("/a.txt".to_string(), "/b.txt".to_string());
        assert!(config.validate().is_ok());
    }
}
