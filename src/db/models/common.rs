//! Common types and utilities shared across models.

use serde::{Deserialize, Serialize};

/// Outbound proxy scheme for a session's device connection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    Http,
    Https,
    Socks5,
}

impl std::fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Https => write!(f, "https"),
            Self::Socks5 => write!(f, "socks5"),
        }
    }
}

impl std::str::FromStr for ProxyScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            "socks5" => Ok(Self::Socks5),
            _ => Err(format!("Unknown proxy scheme: {}", s)),
        }
    }
}

/// Proxy configuration for a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyConfig {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    #[serde(default, alias = "user", skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, alias = "pass", skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Proxy URL without credentials, e.g. `socks5://10.0.0.1:1080`
    pub fn address(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// Copy safe to return from the API
    pub fn masked(&self) -> Self {
        Self {
            password: self.password.as_ref().map(|_| "********".to_string()),
            ..self.clone()
        }
    }
}

/// Helper to parse a proxy JSON column
pub fn parse_proxy(json: Option<&str>) -> Option<ProxyConfig> {
    json.and_then(|s| serde_json::from_str(s).ok())
}

/// Helper to serialize a proxy config for the database
pub fn serialize_proxy(proxy: Option<&ProxyConfig>) -> Option<String> {
    proxy.and_then(|p| serde_json::to_string(p).ok())
}

/// Helper to parse a JSON string array column
pub fn parse_string_list(json: &str) -> Vec<String> {
    serde_json::from_str(json).unwrap_or_default()
}

/// Current time in the storage format (RFC 3339, UTC)
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
