//! Environment-variable parsing shared by the per-crate config structs.
//!
//! Each config exposes `from_env()` plus a `from_lookup(..)` that takes any
//! key -> value function, so parsing can be tested without touching the
//! process environment.

use std::str::FromStr;

use crate::error::CoreError;

/// Read the process environment.
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Look up `key`, treating empty or whitespace-only values as unset.
pub fn lookup_string<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse `key` as `T`, falling back to `default` when unset.
pub fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, CoreError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup_string(lookup, key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| CoreError::Validation(format!("{key} is invalid ('{raw}'): {e}"))),
    }
}

/// Parse a boolean flag. Accepts `1/0`, `true/false`, `yes/no`, `on/off`.
pub fn parse_flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool, CoreError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup_string(lookup, key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(CoreError::Validation(format!(
                "{key} must be a boolean, got '{v}'"
            ))),
        },
    }
}
