use ntex_util::time::Seconds;
use serde::{Deserialize, Serialize};

/// Default mqtt port
pub const DEFAULT_PORT: u16 = 1883;

/// Client options validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    #[error("At least one server address is required")]
    NoServers,
    #[error("Unsupported server scheme `{0}`, use custom connector for tls")]
    UnsupportedScheme(String),
    #[error("Invalid server address `{0}`")]
    InvalidAddress(String),
    #[error("Password is set without username")]
    PasswordWithoutUsername,
    #[error("Client id is required for persistent session")]
    EmptyClientId,
    #[error("Client id is longer than 65535 bytes")]
    ClientIdTooLong,
}

/// Mqtt client options
///
/// ```rust
/// use ntex_mqtt_client::ClientOptions;
///
/// let opts = ClientOptions::default()
///     .server("tcp://127.0.0.1:1883")
///     .client_id("client-1")
///     .keep_alive(ntex_util::time::Seconds(10));
/// assert!(opts.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Broker addresses, tried in order
    pub servers: Vec<String>,
    /// Client identifier, empty if not set
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keep-alive interval in seconds, `0` disables keep-alive
    pub keep_alive: u16,
    pub clean_session: bool,
    /// Connect handshake timeout in seconds, `0` disables timeout
    pub connect_timeout: u16,
    /// Time to wait for PINGRESP in seconds, keep-alive interval if not set
    pub ping_timeout: Option<u16>,
    /// Max inbound packet size, `0` means unlimited
    pub max_packet_size: u32,
    /// Time to flush DISCONNECT packet in seconds, `0` disables timeout
    pub disconnect_timeout: u16,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            servers: Vec::new(),
            client_id: None,
            username: None,
            password: None,
            keep_alive: 30,
            clean_session: true,
            connect_timeout: 10,
            ping_timeout: None,
            max_packet_size: 0,
            disconnect_timeout: 3,
        }
    }
}

impl ClientOptions {
    #[inline]
    /// Add broker address
    pub fn server<T: Into<String>>(mut self, addr: T) -> Self {
        self.servers.push(addr.into());
        self
    }

    #[inline]
    /// Set client identifier
    pub fn client_id<T: Into<String>>(mut self, id: T) -> Self {
        self.client_id = Some(id.into());
        self
    }

    #[inline]
    /// Set username and password
    pub fn credentials<U, P>(mut self, username: U, password: P) -> Self
    where
        U: Into<String>,
        P: Into<String>,
    {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[inline]
    /// Set keep-alive interval.
    ///
    /// keep-alive is set to 30 seconds by default.
    pub fn keep_alive(mut self, val: Seconds) -> Self {
        self.keep_alive = val.0;
        self
    }

    #[inline]
    /// The handling of the Session state.
    pub fn clean_session(mut self, val: bool) -> Self {
        self.clean_session = val;
        self
    }

    /// Set handshake timeout.
    ///
    /// Handshake includes `connect` packet and response `connect-ack`.
    /// By default handshake timeout is 10 seconds.
    pub fn connect_timeout(mut self, timeout: Seconds) -> Self {
        self.connect_timeout = timeout.0;
        self
    }

    /// Set time to wait for PINGRESP after PINGREQ is sent
    pub fn ping_timeout(mut self, timeout: Seconds) -> Self {
        self.ping_timeout = Some(timeout.0);
        self
    }

    #[inline]
    /// Max incoming packet size.
    ///
    /// To disable max size limit set value to 0.
    pub fn max_packet_size(mut self, val: u32) -> Self {
        self.max_packet_size = val;
        self
    }

    /// Set client connection disconnect timeout.
    ///
    /// By default disconnect timeout is set to 3 seconds.
    pub fn disconnect_timeout(mut self, timeout: Seconds) -> Self {
        self.disconnect_timeout = timeout.0;
        self
    }

    /// Check options consistency
    pub fn validate(&self) -> Result<(), OptionsError> {
        ensure!(!self.servers.is_empty(), OptionsError::NoServers);
        for addr in &self.servers {
            parse_server(addr)?;
        }
        ensure!(
            self.password.is_none() || self.username.is_some(),
            OptionsError::PasswordWithoutUsername
        );

        let client_id = self.client_id.as_deref().unwrap_or("");
        ensure!(client_id.len() <= u16::MAX as usize, OptionsError::ClientIdTooLong);
        ensure!(self.clean_session || !client_id.is_empty(), OptionsError::EmptyClientId);
        Ok(())
    }

    /// Broker addresses in `host:port` form
    pub fn addresses(&self) -> Result<Vec<String>, OptionsError> {
        self.servers.iter().map(|s| parse_server(s)).collect()
    }

    pub(crate) fn ping_timeout_secs(&self) -> Seconds {
        Seconds(self.ping_timeout.unwrap_or(self.keep_alive))
    }
}

/// Normalize server url to `host:port`
fn parse_server(addr: &str) -> Result<String, OptionsError> {
    let rest = match addr.split_once("://") {
        Some((scheme, rest)) => match scheme.to_ascii_lowercase().as_str() {
            "tcp" | "mqtt" => rest,
            _ => return Err(OptionsError::UnsupportedScheme(scheme.to_string())),
        },
        None => addr,
    };
    let rest = rest.trim_end_matches('/');
    let invalid = || OptionsError::InvalidAddress(addr.to_string());

    let bracketed = rest.starts_with('[');
    let (host, port) = if bracketed {
        let (host, tail) = rest[1..].split_once(']').ok_or_else(invalid)?;
        match tail {
            "" => (host, None),
            _ => (host, Some(tail.strip_prefix(':').ok_or_else(invalid)?)),
        }
    } else {
        match rest.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (rest, None),
        }
    };
    ensure!(!host.is_empty() && !host.contains(['/', '@', '[', ']']), invalid());
    ensure!(bracketed || !host.contains(':'), invalid());

    let port = match port {
        Some(p) => match p.parse::<u16>() {
            Ok(p) if p != 0 => p,
            _ => return Err(invalid()),
        },
        None => DEFAULT_PORT,
    };

    if bracketed {
        Ok(format!("[{host}]:{port}"))
    } else {
        Ok(format!("{host}:{port}"))
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("tcp://127.0.0.1:1883", "127.0.0.1:1883" ; "tcp scheme")]
    #[test_case("mqtt://broker.local:8883/", "broker.local:8883" ; "mqtt scheme")]
    #[test_case("localhost", "localhost:1883" ; "default port")]
    #[test_case("localhost:1884", "localhost:1884" ; "bare host and port")]
    #[test_case("tcp://[::1]", "[::1]:1883" ; "ipv6 default port")]
    #[test_case("[::1]:1884", "[::1]:1884" ; "ipv6 port")]
    fn test_parse_server(addr: &str, expected: &str) {
        assert_eq!(parse_server(addr).unwrap(), expected);
    }

    #[test_case("ssl://localhost:8883" ; "tls scheme")]
    #[test_case("ws://localhost" ; "websocket scheme")]
    fn test_unsupported_scheme(addr: &str) {
        assert!(matches!(parse_server(addr), Err(OptionsError::UnsupportedScheme(_))));
    }

    #[test_case("" ; "empty")]
    #[test_case("tcp://" ; "empty host")]
    #[test_case("localhost:abc" ; "bad port")]
    #[test_case("localhost:0" ; "zero port")]
    #[test_case("localhost:70000" ; "port overflow")]
    #[test_case("[::1" ; "unclosed bracket")]
    #[test_case("user@localhost" ; "user info")]
    fn test_invalid_address(addr: &str) {
        assert_eq!(parse_server(addr), Err(OptionsError::InvalidAddress(addr.to_string())));
    }

    #[test]
    fn test_validate() {
        assert_eq!(ClientOptions::default().validate(), Err(OptionsError::NoServers));

        let opts = ClientOptions::default().server("localhost");
        assert_eq!(opts.validate(), Ok(()));

        let mut o = opts.clone();
        o.password = Some("secret".into());
        assert_eq!(o.validate(), Err(OptionsError::PasswordWithoutUsername));

        let o = opts.clone().credentials("user", "secret");
        assert_eq!(o.validate(), Ok(()));

        let o = opts.clone().clean_session(false);
        assert_eq!(o.validate(), Err(OptionsError::EmptyClientId));
        assert_eq!(o.client_id("id").validate(), Ok(()));

        let o = opts.clone().client_id("a".repeat(65536));
        assert_eq!(o.validate(), Err(OptionsError::ClientIdTooLong));

        let o = opts.server("ssl://localhost");
        assert!(matches!(o.validate(), Err(OptionsError::UnsupportedScheme(_))));
    }

    #[test]
    fn test_defaults() {
        let opts = ClientOptions::default();
        assert_eq!(opts.keep_alive, 30);
        assert!(opts.clean_session);
        assert_eq!(opts.ping_timeout_secs(), Seconds(30));
        let opts = opts.keep_alive(Seconds(5));
        assert_eq!(opts.ping_timeout_secs(), Seconds(5));
        assert_eq!(opts.ping_timeout(Seconds(2)).ping_timeout_secs(), Seconds(2));
    }

    #[test]
    fn test_deserialize() {
        let opts: ClientOptions = serde_json::from_str(
            r#"{"servers": ["tcp://localhost:1883"], "client_id": "c1", "keep_alive": 15}"#,
        )
        .unwrap();
        assert_eq!(opts.servers, vec!["tcp://localhost:1883".to_string()]);
        assert_eq!(opts.client_id.as_deref(), Some("c1"));
        assert_eq!(opts.keep_alive, 15);
        assert_eq!(opts.connect_timeout, 10);
        assert_eq!(opts.addresses().unwrap(), vec!["localhost:1883".to_string()]);
    }
}
