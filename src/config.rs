// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read from the environment once at startup into
//! [`Settings`].
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory of the session database (`sessions.redb`) | `./data` |
//! | `JWT_SECRET` | Shared HMAC secret, at least 32 bytes | Required |
//! | `JWT_ISSUER` | `iss` of locally issued credentials | `local` |
//! | `ACCESS_TOKEN_TTL_MINUTES` | Access credential lifetime (1 to 1440) | `15` |
//! | `REFRESH_TOKEN_TTL_DAYS` | Refresh session lifetime (1 to 365) | `7` |
//! | `REFRESH_TOKEN_MAX_PER_PRINCIPAL` | Active sessions per principal before all are revoked (1 to 1000) | `5` |
//! | `REFRESH_TOKEN_ROTATION` | Replace the refresh token on every refresh | `false` |
//! | `TOKEN_SWEEP_INTERVAL_SECS` | Expired-session sweep period | `3600` |
//! | `RATE_LIMIT_SWEEP_INTERVAL_SECS` | Idle rate-window sweep period | `300` |
//! | `RATE_LIMIT_IDLE_SECS` | Idle time after which a rate window is dropped (up to 1 day) | `600` |
//! | `OIDC_PROVIDERS` | `name=issuer_url[\|audience],...` | empty |
//! | `PUBLIC_PATHS` | Comma-separated paths that bypass authentication | built-in list |
//! | `PRINCIPALS_FILE` | JSON seed for the in-memory principal directory | Optional |
//! | `PASSWORD_PEPPER` | Key of the placeholder credential hasher | empty |
//! | `RESET_PASSWORD_URL` | Page receiving password-reset links | `http://localhost:3000/reset-password` |
//! | `REGISTRATION_VERIFY_URL` | Endpoint receiving registration links | `http://localhost:8080/api/auth/register/verify` |
//! | `TLS_CERT_PATH`, `TLS_KEY_PATH` | PEM files; HTTPS when both are set | Optional |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::ops::RangeInclusive;
use std::path::PathBuf;

use chrono::Duration;

use crate::auth::ProviderConfig;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const JWT_SECRET_ENV: &str = "JWT_SECRET";
pub const JWT_ISSUER_ENV: &str = "JWT_ISSUER";
pub const ACCESS_TOKEN_TTL_ENV: &str = "ACCESS_TOKEN_TTL_MINUTES";
pub const REFRESH_TOKEN_TTL_ENV: &str = "REFRESH_TOKEN_TTL_DAYS";
pub const REFRESH_TOKEN_MAX_ENV: &str = "REFRESH_TOKEN_MAX_PER_PRINCIPAL";
pub const REFRESH_TOKEN_ROTATION_ENV: &str = "REFRESH_TOKEN_ROTATION";
pub const TOKEN_SWEEP_INTERVAL_ENV: &str = "TOKEN_SWEEP_INTERVAL_SECS";
pub const RATE_LIMIT_SWEEP_INTERVAL_ENV: &str = "RATE_LIMIT_SWEEP_INTERVAL_SECS";
pub const RATE_LIMIT_IDLE_ENV: &str = "RATE_LIMIT_IDLE_SECS";
pub const OIDC_PROVIDERS_ENV: &str = "OIDC_PROVIDERS";
pub const PUBLIC_PATHS_ENV: &str = "PUBLIC_PATHS";
pub const PRINCIPALS_FILE_ENV: &str = "PRINCIPALS_FILE";
pub const PASSWORD_PEPPER_ENV: &str = "PASSWORD_PEPPER";
pub const RESET_PASSWORD_URL_ENV: &str = "RESET_PASSWORD_URL";
pub const REGISTRATION_VERIFY_URL_ENV: &str = "REGISTRATION_VERIFY_URL";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Session database file name inside `DATA_DIR`.
pub const SESSION_DB_FILE: &str = "sessions.redb";

/// Minimum length of the shared HMAC secret (256 bits).
pub const MIN_SECRET_LEN: usize = 32;

const ACCESS_TTL_MINUTES: RangeInclusive<i64> = 1..=24 * 60;
const REFRESH_TTL_DAYS: RangeInclusive<i64> = 1..=365;
const MAX_SESSIONS: RangeInclusive<usize> = 1..=1000;
const RATE_LIMIT_IDLE_SECS: RangeInclusive<i64> = 1..=24 * 60 * 60;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{JWT_SECRET_ENV} must be at least {MIN_SECRET_LEN} bytes")]
    SecretTooShort,

    #[error("{TLS_CERT_PATH_ENV} and {TLS_KEY_PATH_ENV} must be set together")]
    IncompleteTls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Fully parsed runtime configuration.
#[derive(Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub jwt_secret: Vec<u8>,
    pub jwt_issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub max_sessions_per_principal: usize,
    pub rotate_refresh_tokens: bool,
    pub token_sweep_interval: std::time::Duration,
    pub rate_limit_sweep_interval: std::time::Duration,
    pub rate_limit_idle: Duration,
    pub oidc_providers: Vec<ProviderConfig>,
    pub public_paths: Option<Vec<String>>,
    pub principals_file: Option<PathBuf>,
    pub password_pepper: String,
    pub reset_password_url: String,
    pub registration_verify_url: String,
    pub tls: Option<TlsPaths>,
    pub log_format: LogFormat,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("data_dir", &self.data_dir)
            .field("jwt_secret", &"<redacted>")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("max_sessions_per_principal", &self.max_sessions_per_principal)
            .field("rotate_refresh_tokens", &self.rotate_refresh_tokens)
            .field("oidc_providers", &self.oidc_providers)
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

fn parse_num<T: std::str::FromStr>(
    var: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

/// Like [`parse_num`], additionally requiring the value to lie in `range`.
fn parse_bounded<T>(
    var: &'static str,
    raw: Option<String>,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    let value = parse_num(var, raw, default)?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: format!("must be between {} and {}", range.start(), range.end()),
        });
    }
    Ok(value)
}

fn parse_bool(var: &'static str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match raw.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(ConfigError::Invalid {
            var,
            value: v,
            reason: "expected true or false".to_string(),
        }),
    }
}

/// Parse `name=issuer_url[|audience],...`.
pub fn parse_providers(raw: &str) -> Result<Vec<ProviderConfig>, ConfigError> {
    let invalid = |value: &str, reason: &str| ConfigError::Invalid {
        var: OIDC_PROVIDERS_ENV,
        value: value.to_string(),
        reason: reason.to_string(),
    };

    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, rest) = entry
                .split_once('=')
                .ok_or_else(|| invalid(entry, "expected name=issuer_url"))?;
            let (issuer, audience) = match rest.split_once('|') {
                Some((issuer, audience)) => (issuer, Some(audience.trim().to_string())),
                None => (rest, None),
            };
            let issuer = issuer.trim();
            let parsed = url::Url::parse(issuer).map_err(|e| invalid(entry, &e.to_string()))?;
            if parsed.scheme() != "https" && parsed.host_str() != Some("localhost") {
                return Err(invalid(entry, "issuer must use https"));
            }
            let name = name.trim();
            if name.is_empty() {
                return Err(invalid(entry, "provider name is empty"));
            }
            Ok(ProviderConfig {
                name: name.to_string(),
                issuer: issuer.to_string(),
                audience: audience.filter(|a| !a.is_empty()),
            })
        })
        .collect()
}

impl Settings {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let jwt_secret = get(JWT_SECRET_ENV)
            .ok_or(ConfigError::Missing(JWT_SECRET_ENV))?
            .into_bytes();
        if jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::SecretTooShort);
        }

        let access_minutes = parse_bounded(
            ACCESS_TOKEN_TTL_ENV,
            get(ACCESS_TOKEN_TTL_ENV),
            15,
            ACCESS_TTL_MINUTES,
        )?;
        let refresh_days = parse_bounded(
            REFRESH_TOKEN_TTL_ENV,
            get(REFRESH_TOKEN_TTL_ENV),
            7,
            REFRESH_TTL_DAYS,
        )?;
        let max_sessions = parse_bounded(
            REFRESH_TOKEN_MAX_ENV,
            get(REFRESH_TOKEN_MAX_ENV),
            5,
            MAX_SESSIONS,
        )?;

        let tls = match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteTls),
        };

        let log_format = match get(LOG_FORMAT_ENV).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            host: get(HOST_ENV).unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_num(PORT_ENV, get(PORT_ENV), 8080)?,
            data_dir: get(DATA_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            jwt_secret,
            jwt_issuer: get(JWT_ISSUER_ENV).unwrap_or_else(|| "local".to_string()),
            access_ttl: Duration::minutes(access_minutes),
            refresh_ttl: Duration::days(refresh_days),
            max_sessions_per_principal: max_sessions,
            rotate_refresh_tokens: parse_bool(
                REFRESH_TOKEN_ROTATION_ENV,
                get(REFRESH_TOKEN_ROTATION_ENV),
                false,
            )?,
            token_sweep_interval: std::time::Duration::from_secs(parse_num(
                TOKEN_SWEEP_INTERVAL_ENV,
                get(TOKEN_SWEEP_INTERVAL_ENV),
                3600,
            )?),
            rate_limit_sweep_interval: std::time::Duration::from_secs(parse_num(
                RATE_LIMIT_SWEEP_INTERVAL_ENV,
                get(RATE_LIMIT_SWEEP_INTERVAL_ENV),
                300,
            )?),
            rate_limit_idle: Duration::seconds(parse_bounded(
                RATE_LIMIT_IDLE_ENV,
                get(RATE_LIMIT_IDLE_ENV),
                600,
                RATE_LIMIT_IDLE_SECS,
            )?),
            oidc_providers: match get(OIDC_PROVIDERS_ENV) {
                Some(raw) => parse_providers(&raw)?,
                None => Vec::new(),
            },
            public_paths: get(PUBLIC_PATHS_ENV).map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            }),
            principals_file: get(PRINCIPALS_FILE_ENV).map(PathBuf::from),
            password_pepper: get(PASSWORD_PEPPER_ENV).unwrap_or_default(),
            reset_password_url: get(RESET_PASSWORD_URL_ENV)
                .unwrap_or_else(|| "http://localhost:3000/reset-password".to_string()),
            registration_verify_url: get(REGISTRATION_VERIFY_URL_ENV).unwrap_or_else(|| {
                "http://localhost:8080/api/auth/register/verify".to_string()
            }),
            tls,
            log_format,
        })
    }

    /// Settings for tests: fixed secret, defaults everywhere else.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        let mut settings = Self::from_lookup(|var| match var {
            JWT_SECRET_ENV => Some("test-secret-0123456789abcdef-0123456789".to_string()),
            _ => None,
        })
        .unwrap();
        settings.data_dir = std::env::temp_dir();
        settings
    }

    pub fn session_db_path(&self) -> PathBuf {
        self.data_dir.join(SESSION_DB_FILE)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn load(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn defaults_apply() {
        let settings = load(&[(JWT_SECRET_ENV, SECRET)]).unwrap();
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.jwt_issuer, "local");
        assert_eq!(settings.access_ttl, Duration::minutes(15));
        assert_eq!(settings.refresh_ttl, Duration::days(7));
        assert_eq!(settings.max_sessions_per_principal, 5);
        assert!(!settings.rotate_refresh_tokens);
        assert_eq!(settings.token_sweep_interval.as_secs(), 3600);
        assert!(settings.oidc_providers.is_empty());
        assert!(settings.tls.is_none());
        assert_eq!(settings.log_format, LogFormat::Pretty);
        assert_eq!(settings.session_db_path(), PathBuf::from("./data/sessions.redb"));
    }

    #[test]
    fn secret_is_required_and_long_enough() {
        assert_eq!(load(&[]).err(), Some(ConfigError::Missing(JWT_SECRET_ENV)));
        assert_eq!(
            load(&[(JWT_SECRET_ENV, "short")]).err(),
            Some(ConfigError::SecretTooShort)
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let settings = load(&[
            (JWT_SECRET_ENV, SECRET),
            (PORT_ENV, "9000"),
            (ACCESS_TOKEN_TTL_ENV, "5"),
            (REFRESH_TOKEN_ROTATION_ENV, "true"),
            (PUBLIC_PATHS_ENV, "/health, /api/auth"),
            (LOG_FORMAT_ENV, "json"),
        ])
        .unwrap();
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.access_ttl, Duration::minutes(5));
        assert!(settings.rotate_refresh_tokens);
        assert_eq!(
            settings.public_paths,
            Some(vec!["/health".to_string(), "/api/auth".to_string()])
        );
        assert_eq!(settings.log_format, LogFormat::Json);
    }

    #[test]
    fn bad_numbers_are_reported() {
        let err = load(&[(JWT_SECRET_ENV, SECRET), (PORT_ENV, "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: PORT_ENV, .. }));
    }

    #[test]
    fn out_of_range_values_name_their_variable() {
        for (var, value) in [
            (ACCESS_TOKEN_TTL_ENV, "0"),
            (ACCESS_TOKEN_TTL_ENV, "1441"),
            (REFRESH_TOKEN_TTL_ENV, "9223372036854775807"),
            (REFRESH_TOKEN_TTL_ENV, "-1"),
            (REFRESH_TOKEN_MAX_ENV, "0"),
            (RATE_LIMIT_IDLE_ENV, "9223372036854775807"),
        ] {
            let err = load(&[(JWT_SECRET_ENV, SECRET), (var, value)]).unwrap_err();
            assert!(
                matches!(&err, ConfigError::Invalid { var: v, .. } if *v == var),
                "{var}={value}: {err}"
            );
        }

        let settings = load(&[
            (JWT_SECRET_ENV, SECRET),
            (ACCESS_TOKEN_TTL_ENV, "1440"),
            (REFRESH_TOKEN_TTL_ENV, "365"),
        ])
        .unwrap();
        assert_eq!(settings.refresh_ttl, Duration::days(365));
    }

    #[test]
    fn tls_requires_both_paths() {
        let err = load(&[(JWT_SECRET_ENV, SECRET), (TLS_CERT_PATH_ENV, "cert.pem")]).unwrap_err();
        assert_eq!(err, ConfigError::IncompleteTls);
    }

    #[test]
    fn providers_parse_with_optional_audience() {
        let providers = parse_providers(
            "google=https://accounts.google.com|my-client, corp=https://login.example.com/",
        )
        .unwrap();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].name, "google");
        assert_eq!(providers[0].audience.as_deref(), Some("my-client"));
        assert_eq!(providers[1].issuer, "https://login.example.com/");
        assert!(providers[1].audience.is_none());
    }

    #[test]
    fn providers_reject_plain_http_and_bad_entries() {
        assert!(parse_providers("x=http://idp.example.com").is_err());
        assert!(parse_providers("no-equals-sign").is_err());
        assert!(parse_providers("=https://idp.example.com").is_err());
    }
}
