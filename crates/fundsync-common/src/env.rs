//! Typed environment variable lookups
//!
//! Unset variables fall back to the supplied default. A variable that is set
//! but cannot be parsed is an error, so a typo in deployment configuration
//! surfaces at startup instead of silently using the default.

use std::str::FromStr;

use crate::error::{FundsyncError, Result};

/// Read a string variable, falling back to `default` when unset or blank
pub fn var_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}

/// Read and parse a variable, falling back to `default` when unset or blank
pub fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_opt(key)?.unwrap_or(default))
}

/// Read and parse an optional variable
pub fn parse_opt<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| FundsyncError::InvalidEnv {
                    key: key.to_string(),
                    value: raw.clone(),
                    reason: e.to_string(),
                })
        },
        _ => Ok(None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_parse_or_uses_default_when_unset() {
        std::env::remove_var("FUNDSYNC_TEST_PORT");
        assert_eq!(parse_or("FUNDSYNC_TEST_PORT", 8080u16).unwrap(), 8080);
    }

    #[test]
    #[serial]
    fn test_parse_or_reads_value() {
        std::env::set_var("FUNDSYNC_TEST_PORT", " 9000 ");
        let port = parse_or("FUNDSYNC_TEST_PORT", 8080u16).unwrap();
        std::env::remove_var("FUNDSYNC_TEST_PORT");
        assert_eq!(port, 9000);
    }

    #[test]
    #[serial]
    fn test_parse_or_rejects_garbage() {
        std::env::set_var("FUNDSYNC_TEST_PORT", "eighty");
        let err = parse_or("FUNDSYNC_TEST_PORT", 8080u16).unwrap_err();
        std::env::remove_var("FUNDSYNC_TEST_PORT");
        assert!(err.to_string().contains("FUNDSYNC_TEST_PORT"));
    }

    #[test]
    #[serial]
    fn test_var_or_ignores_blank() {
        std::env::set_var("FUNDSYNC_TEST_HOST", "   ");
        let host = var_or("FUNDSYNC_TEST_HOST", "127.0.0.1");
        std::env::remove_var("FUNDSYNC_TEST_HOST");
        assert_eq!(host, "127.0.0.1");
    }
}
