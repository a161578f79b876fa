use std::{fs, str::FromStr, time::Duration};

use tracing::warn;

pub const CONFIG_FILE: &str = "server.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_bind: String,
    pub hibernate: bool,
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_body_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:1999".into(),
            hibernate: true,
            idle_timeout_secs: 30,
            sweep_interval_secs: 10,
            max_body_bytes: 64 * 1024,
        }
    }
}

impl Settings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Never zero: `tokio::time::interval` rejects a zero period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

pub fn load_settings() -> Settings {
    let file = fs::read_to_string(CONFIG_FILE).ok();
    settings_from_sources(file.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then `server.toml`, then environment variables. Later sources win.
pub fn settings_from_sources(
    file: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file {
        match raw.parse::<toml::Table>() {
            Ok(table) => {
                let lookup = |key: &str| table_value(&table, key);
                apply(&mut settings, "server.toml", lookup, FILE_KEYS);
            }
            Err(error) => warn!(%error, "ignoring unreadable {CONFIG_FILE}"),
        }
    }

    apply(&mut settings, "environment", &env, LEGACY_ENV_KEYS);
    apply(&mut settings, "environment", &env, ENV_KEYS);
    settings
}

struct Keys {
    bind: &'static str,
    hibernate: &'static str,
    idle_timeout: &'static str,
    sweep_interval: &'static str,
    max_body: &'static str,
}

const FILE_KEYS: Keys = Keys {
    bind: "bind_addr",
    hibernate: "hibernate",
    idle_timeout: "idle_timeout_secs",
    sweep_interval: "sweep_interval_secs",
    max_body: "max_body_bytes",
};

const LEGACY_ENV_KEYS: Keys = Keys {
    bind: "SERVER_BIND",
    hibernate: "HIBERNATE",
    idle_timeout: "IDLE_TIMEOUT_SECS",
    sweep_interval: "SWEEP_INTERVAL_SECS",
    max_body: "MAX_BODY_BYTES",
};

const ENV_KEYS: Keys = Keys {
    bind: "APP__BIND_ADDR",
    hibernate: "APP__HIBERNATE",
    idle_timeout: "APP__IDLE_TIMEOUT_SECS",
    sweep_interval: "APP__SWEEP_INTERVAL_SECS",
    max_body: "APP__MAX_BODY_BYTES",
};

fn apply(
    settings: &mut Settings,
    source: &str,
    lookup: impl Fn(&str) -> Option<String>,
    keys: Keys,
) {
    if let Some(v) = lookup(keys.bind) {
        settings.server_bind = v;
    }
    if let Some(v) = parsed(source, keys.hibernate, lookup(keys.hibernate)) {
        settings.hibernate = v;
    }
    if let Some(v) = parsed(source, keys.idle_timeout, lookup(keys.idle_timeout)) {
        settings.idle_timeout_secs = v;
    }
    if let Some(v) = parsed(source, keys.sweep_interval, lookup(keys.sweep_interval)) {
        settings.sweep_interval_secs = v;
    }
    if let Some(v) = parsed(source, keys.max_body, lookup(keys.max_body)) {
        settings.max_body_bytes = v;
    }
}

fn parsed<T: FromStr>(source: &str, key: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(source, key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}

fn table_value(table: &toml::Table, key: &str) -> Option<String> {
    match table.get(key)? {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        other => {
            warn!(key, value = %other, "ignoring setting of unsupported type");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
