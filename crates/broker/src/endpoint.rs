use std::fmt::{self, Debug, Display};

/// Network location of a broker.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Endpoint {
    /// Host name, IP address or orchestrator service name.
    pub host: String,

    /// Port the broker's client protocol listens on.
    pub port: u16,
}

impl Endpoint {
    /// Creates a new endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Username/password pair presented to the broker.
#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
    /// Username.
    pub username: String,

    /// Password.
    pub password: String,
}

impl Credentials {
    /// Creates a new set of credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new("guest", "guest")
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::new("nats", 4222).to_string(), "nats:4222");
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials::new("app", "hunter2");
        let debug = format!("{credentials:?}");

        assert!(debug.contains("app"));
        assert!(!debug.contains("hunter2"));
    }
}
