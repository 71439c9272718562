//! Per-source configuration, read from the environment.
//!
//! Sources are named via `STRATA_POSTGRESQL_SOURCE_NAMES` (comma-separated);
//! an empty list means one unnamed source. Every other variable is suffixed
//! with `_<NAME>` for named sources, e.g. `STRATA_POSTGRESQL_HOST_STAC`.

use std::collections::HashSet;
use std::env;

pub const ENV_VAR_PREFIX: &str = "STRATA_";

/// Schema holding the overlay metadata table
pub const OVERLAY_SCHEMA_NAME: &str = "strata";

/// Configuration for one named postgres connection
#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Connection name; `None` for the single unnamed source
    pub name: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    /// Bounded retry count for connection establishment
    pub connect_retries: u32,
    /// IANA zone name used to interpret timezone-naive stored values
    pub default_tz: String,
    /// Whether the overlay table is managed (migrated and merged) here
    pub manage_collections: bool,
    /// Qualified table names explicitly exposed; exclusive with `deny_list`
    pub allow_list: HashSet<String>,
    /// Qualified table names explicitly hidden; exclusive with `allow_list`
    pub deny_list: HashSet<String>,
}

impl SourceSettings {
    /// Load settings for one source from the environment.
    pub fn from_env(name: Option<&str>) -> Self {
        Self {
            name: name.map(|n| n.to_string()),
            host: var_or(name, "POSTGRESQL_HOST", "localhost"),
            port: var_or(name, "POSTGRESQL_PORT", "5432")
                .parse()
                .unwrap_or(5432),
            user: var_or(name, "POSTGRESQL_USER", "postgres"),
            password: var_or(name, "POSTGRESQL_PASSWORD", "postgres"),
            dbname: var_or(name, "POSTGRESQL_DBNAME", "postgres"),
            connect_retries: var_or(name, "POSTGRESQL_CONNECT_RETRIES", "30")
                .parse()
                .unwrap_or(30),
            default_tz: var_or(name, "POSTGRESQL_DEFAULT_TZ", "UTC"),
            manage_collections: var_or(name, "POSTGRESQL_MANAGE_COLLECTIONS", "1") == "1",
            allow_list: list_var(name, "POSTGRESQL_LAYER_ALLOW"),
            deny_list: list_var(name, "POSTGRESQL_LAYER_DENY"),
        }
    }

    /// libpq-style connection string for tokio-postgres
    pub fn connection_config(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={}",
            self.host, self.port, self.user, self.password, self.dbname
        )
    }

    /// Connection identity for logs, without the password
    pub fn display_name(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.user, self.host, self.port, self.dbname
        )
    }
}

/// Configured source names; empty environment means one unnamed source.
pub fn source_names() -> Vec<Option<String>> {
    let names: Vec<String> = env::var(format!("{ENV_VAR_PREFIX}POSTGRESQL_SOURCE_NAMES"))
        .unwrap_or_default()
        .split(',')
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect();
    if names.is_empty() {
        vec![None]
    } else {
        names.into_iter().map(Some).collect()
    }
}

fn var_or(name: Option<&str>, key: &str, default: &str) -> String {
    env::var(format!(
        "{ENV_VAR_PREFIX}{key}{}",
        name_to_suffix(name)
    ))
    .unwrap_or_else(|_| default.to_string())
}

fn list_var(name: Option<&str>, key: &str) -> HashSet<String> {
    var_or(name, key, "")
        .split(',')
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

fn name_to_suffix(name: Option<&str>) -> String {
    match name {
        Some(name) => format!("_{name}"),
        None => String::new(),
    }
}
