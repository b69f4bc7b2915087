//! Connection-string parsing.
//!
//! Accepts both the URL form (`postgres://user:pw@host:5432/db?sslmode=require`)
//! and the keyword form (`user=bob password=secret host=db port=5432`) and turns
//! either into the same attribute map.

use std::collections::HashMap;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use tokio_postgres::config::SslMode;
use url::Url;

use crate::error::PgCompatError;

/// Parse a DSN in URL or keyword form into its attribute map.
///
/// Only attributes present in the input appear in the map. The URL query
/// parameter `searchPath` is reported as `search_path`.
///
/// # Errors
/// Returns `PgCompatError::DsnError` for malformed input.
pub fn parse_dsn(dsn: &str) -> Result<HashMap<String, String>, PgCompatError> {
    let trimmed = dsn.trim();
    if trimmed.starts_with("postgres://") || trimmed.starts_with("postgresql://") {
        parse_url(trimmed)
    } else {
        parse_keywords(trimmed)
    }
}

fn parse_url(dsn: &str) -> Result<HashMap<String, String>, PgCompatError> {
    let url = Url::parse(dsn)?;
    let mut map = HashMap::new();

    if !url.username().is_empty() {
        map.insert("user".to_string(), decode(url.username())?);
    }
    if let Some(password) = url.password() {
        map.insert("password".to_string(), decode(password)?);
    }
    if let Some(host) = url.host_str().filter(|h| !h.is_empty()) {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        map.insert("host".to_string(), decode(host)?);
    }
    if let Some(port) = url.port() {
        map.insert("port".to_string(), port.to_string());
    }
    let dbname = url.path().trim_start_matches('/');
    if !dbname.is_empty() {
        map.insert("dbname".to_string(), decode(dbname)?);
    }

    for (key, value) in url.query_pairs() {
        map.insert(normalize_key(&key).to_string(), value.into_owned());
    }
    Ok(map)
}

fn decode(raw: &str) -> Result<String, PgCompatError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| PgCompatError::DsnError(format!("invalid percent-encoding: {e}")))
}

fn normalize_key(key: &str) -> &str {
    match key {
        "searchPath" => "search_path",
        other => other,
    }
}

fn parse_keywords(dsn: &str) -> Result<HashMap<String, String>, PgCompatError> {
    let mut map = HashMap::new();
    let mut chars = dsn.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
            key.push(c);
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next() != Some('=') {
            return Err(PgCompatError::DsnError(format!(
                "missing \"=\" after \"{key}\" in connection string"
            )));
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'\'').is_some() {
            loop {
                match chars.next() {
                    Some('\\') => match chars.next() {
                        Some(escaped) => value.push(escaped),
                        None => {
                            return Err(PgCompatError::DsnError(
                                "unterminated escape in connection string".to_string(),
                            ));
                        }
                    },
                    Some('\'') => break,
                    Some(c) => value.push(c),
                    None => {
                        return Err(PgCompatError::DsnError(
                            "unterminated quoted value in connection string".to_string(),
                        ));
                    }
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        value.push(escaped);
                    }
                } else {
                    value.push(c);
                }
            }
        }

        if key.is_empty() {
            return Err(PgCompatError::DsnError(
                "empty key in connection string".to_string(),
            ));
        }
        map.insert(normalize_key(&key).to_string(), value);
    }

    Ok(map)
}

/// Translate an attribute map into a `tokio_postgres` connection config.
///
/// # Errors
/// Returns `PgCompatError::DsnError` for an invalid port, timeout or sslmode.
pub fn pg_config_from_dsn(
    attrs: &HashMap<String, String>,
) -> Result<tokio_postgres::Config, PgCompatError> {
    let mut cfg = tokio_postgres::Config::new();

    if let Some(user) = attrs.get("user") {
        cfg.user(user);
    }
    if let Some(password) = attrs.get("password") {
        cfg.password(password);
    }
    if let Some(host) = attrs.get("host") {
        for h in host.split(',').filter(|h| !h.is_empty()) {
            cfg.host(h);
        }
    }
    if let Some(port) = attrs.get("port") {
        for p in port.split(',').filter(|p| !p.is_empty()) {
            let port = p
                .parse::<u16>()
                .map_err(|_| PgCompatError::DsnError(format!("invalid port \"{p}\"")))?;
            cfg.port(port);
        }
    }
    if let Some(dbname) = attrs.get("dbname").filter(|d| !d.is_empty()) {
        cfg.dbname(dbname);
    }
    if let Some(app) = attrs.get("application_name") {
        cfg.application_name(app);
    }
    if let Some(mode) = attrs.get("sslmode") {
        cfg.ssl_mode(ssl_mode(mode)?);
    }
    if let Some(secs) = attrs.get("connect_timeout") {
        let secs = secs.parse::<u64>().map_err(|_| {
            PgCompatError::DsnError(format!("invalid connect_timeout \"{secs}\""))
        })?;
        if secs > 0 {
            cfg.connect_timeout(Duration::from_secs(secs));
        }
    }

    let mut options = attrs.get("options").cloned().unwrap_or_default();
    if let Some(path) = attrs.get("search_path").filter(|p| !p.is_empty()) {
        if !options.is_empty() {
            options.push(' ');
        }
        options.push_str(&format!("-c search_path={}", search_path_option(path)));
    }
    if !options.is_empty() {
        cfg.options(&options);
    }

    Ok(cfg)
}

/// Render a schema list for the startup `options` string.
///
/// The server splits `options` on unescaped whitespace, so entries are
/// trimmed and any space left inside a quoted name is backslash-escaped.
fn search_path_option(path: &str) -> String {
    let joined = path.split(',').map(str::trim).collect::<Vec<_>>().join(",");
    let mut out = String::with_capacity(joined.len());
    for c in joined.chars() {
        if c == '\\' || c.is_whitespace() {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Map a libpq `sslmode` onto what the driver can negotiate.
///
/// # Errors
/// Returns `PgCompatError::DsnError` for an unknown mode.
pub fn ssl_mode(mode: &str) -> Result<SslMode, PgCompatError> {
    match mode {
        "disable" => Ok(SslMode::Disable),
        "allow" | "prefer" => Ok(SslMode::Prefer),
        "require" | "verify-ca" | "verify-full" => Ok(SslMode::Require),
        other => Err(PgCompatError::DsnError(format!(
            "sslmode \"{other}\" is not supported"
        ))),
    }
}
