//! Input validation for API requests.
//!
//! Validators return `Err(message)` describing the first problem found. The
//! session manager lifts these into field-scoped `GatewayError::InvalidInput`
//! values; handlers can also collect several of them with the
//! `ValidationErrorBuilder` from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;

use crate::db::ProxyConfig;

lazy_static! {
    /// Session names: letters, digits, space, underscore and dash
    static ref SESSION_NAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9 _-]+$").unwrap();

    /// E.164 digits without the leading plus
    static ref E164_DIGITS_REGEX: Regex = Regex::new(r"^[1-9][0-9]{6,14}$").unwrap();

    /// Proxy hosts: hostnames, IPv4 literals, or bracketless IPv6 literals
    static ref PROXY_HOST_REGEX: Regex = Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9.:-]*[A-Za-z0-9])?$").unwrap();
}

const MAX_SESSION_NAME_CHARS: usize = 100;

/// Validate a session name, returning the trimmed name
pub fn validate_session_name(name: &str) -> Result<String, String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Session name is required".to_string());
    }

    if name.chars().count() > MAX_SESSION_NAME_CHARS {
        return Err(format!(
            "Session name is too long (max {} characters)",
            MAX_SESSION_NAME_CHARS
        ));
    }

    if !SESSION_NAME_REGEX.is_match(name) {
        return Err(
            "Session name may only contain letters, digits, spaces, underscores and dashes"
                .to_string(),
        );
    }

    Ok(name.to_string())
}

/// Validate an E.164 phone number and return its digits.
///
/// Spaces, dashes and parentheses are ignored; a leading `+` is optional.
pub fn normalize_phone(phone: &str) -> Result<String, String> {
    let stripped: String = phone
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();

    if stripped.is_empty() {
        return Err("Phone number is required".to_string());
    }

    let digits = stripped.strip_prefix('+').unwrap_or(&stripped);
    if !E164_DIGITS_REGEX.is_match(digits) {
        return Err(
            "Phone number must be in E.164 format (7-15 digits, country code first)".to_string(),
        );
    }

    Ok(digits.to_string())
}

/// Validate a proxy configuration
pub fn validate_proxy(proxy: &ProxyConfig) -> Result<(), String> {
    let host = proxy.host.trim();
    if host.is_empty() {
        return Err("Proxy host is required".to_string());
    }

    if host.len() > 253 {
        return Err("Proxy host is too long (max 253 characters)".to_string());
    }

    if !PROXY_HOST_REGEX.is_match(host) {
        return Err("Invalid proxy host format".to_string());
    }

    if proxy.port == 0 {
        return Err("Proxy port must be between 1 and 65535".to_string());
    }

    let has_user = proxy.username.as_deref().is_some_and(|u| !u.is_empty());
    let has_pass = proxy.password.as_deref().is_some_and(|p| !p.is_empty());
    if has_user && !has_pass {
        return Err("Proxy password is required when a username is set".to_string());
    }
    if has_pass && !has_user {
        return Err("Proxy username is required when a password is set".to_string());
    }

    Ok(())
}

/// Validate a UUID string
pub fn validate_uuid(id: &str, field_name: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} is required", field_name));
    }

    if uuid::Uuid::parse_str(id).is_err() {
        return Err(format!("Invalid {} format", field_name));
    }

    Ok(())
}
