//! Host address parsing

use std::fmt;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::ExecError;

/// Standard SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Parsed `[user@]host[:port]` address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    /// Hostname or IP address (lower-cased, without IPv6 brackets)
    pub host: String,
    /// Username embedded in the address
    pub user: Option<String>,
    /// Port embedded in the address
    pub port: Option<u16>,
}

impl HostSpec {
    /// Parse an address using URI authority rules
    ///
    /// # Errors
    /// Returns `ExecError::InvalidHost` if the address has no host or a bad port
    pub fn parse(address: &str) -> Result<Self, ExecError> {
        let invalid = || ExecError::InvalidHost(address.to_string());

        let trimmed = address.trim();
        if trimmed.is_empty() || trimmed.contains('/') {
            return Err(invalid());
        }

        let url = Url::parse(&format!("ssh://{trimmed}")).map_err(|_| invalid())?;

        let host = url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_lowercase())
            .filter(|h| !h.is_empty())
            .ok_or_else(invalid)?;

        // userinfo comes back percent-encoded
        let user = percent_decode_str(url.username())
            .decode_utf8()
            .map_err(|_| invalid())?;
        let user = Some(user.into_owned()).filter(|u| !u.is_empty());

        Ok(Self {
            host,
            user,
            port: url.port(),
        })
    }

    /// Port to connect to, falling back to the SSH default
    #[must_use]
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SSH_PORT)
    }
}

impl fmt::Display for HostSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            write!(f, "{}", self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_host() {
        let spec = HostSpec::parse("example.com").unwrap();
        assert_eq!(spec.host, "example.com");
        assert_eq!(spec.user, None);
        assert_eq!(spec.port, None);
        assert_eq!(spec.port_or_default(), 22);
    }

    #[test]
    fn test_parse_user_and_port() {
        let spec = HostSpec::parse("ubuntu@10.0.0.5:2222").unwrap();
        assert_eq!(spec.host, "10.0.0.5");
        assert_eq!(spec.user.as_deref(), Some("ubuntu"));
        assert_eq!(spec.port, Some(2222));
    }

    #[test]
    fn test_parse_lowercases_hostname() {
        let spec = HostSpec::parse("root@Build-Box.Example.COM").unwrap();
        assert_eq!(spec.host, "build-box.example.com");
        assert_eq!(spec.user.as_deref(), Some("root"));
    }

    #[test]
    fn test_parse_ipv6() {
        let spec = HostSpec::parse("admin@[::1]:2200").unwrap();
        assert_eq!(spec.host, "::1");
        assert_eq!(spec.port, Some(2200));
        assert_eq!(spec.to_string(), "admin@[::1]:2200");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(HostSpec::parse(""), Err(ExecError::InvalidHost(_))));
        assert!(HostSpec::parse("host:notaport").is_err());
        assert!(HostSpec::parse("host:99999").is_err());
    }

    #[test]
    fn test_parse_decodes_user() {
        let spec = HostSpec::parse("dom%40corp@box:2222").unwrap();
        assert_eq!(spec.user.as_deref(), Some("dom@corp"));
        assert_eq!(spec.host, "box");
        assert_eq!(spec.port, Some(2222));
        assert_eq!(HostSpec::parse(&spec.to_string()).unwrap(), spec);
    }

    #[test]
    fn test_parse_rejects_user_that_is_not_utf8() {
        assert!(matches!(
            HostSpec::parse("%ff%fe@box"),
            Err(ExecError::InvalidHost(_))
        ));
    }

    #[test]
    fn test_display_round_trips_input() {
        assert_eq!(
            HostSpec::parse("vagrant@box:2022").unwrap().to_string(),
            "vagrant@box:2022"
        );
    }
}
