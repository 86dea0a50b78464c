use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{
    net::{SocketAddr, ToSocketAddrs},
    path::PathBuf,
    time::Duration,
};

/// Largest page the remote query endpoint accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub snapshot_dir: PathBuf,
    pub encryption_key: Option<String>,
    pub insecure_default_key: bool,
    pub notion_base_url: String,
    pub notion_version: String,
    pub page_size: u32,
    pub request_timeout: Duration,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    chart_listen_addr: Option<String>,
    #[serde(default)]
    chart_listen_host: Option<String>,
    #[serde(default)]
    chart_listen_port: Option<u16>,
    #[serde(default = "default_snapshot_dir")]
    chart_snapshot_dir: PathBuf,
    #[serde(default)]
    chart_encryption_key: Option<String>,
    #[serde(default)]
    chart_insecure_default_key: bool,
    #[serde(default = "default_base_url")]
    chart_notion_base_url: String,
    #[serde(default = "default_notion_version")]
    chart_notion_version: String,
    #[serde(default = "default_page_size")]
    chart_page_size: u32,
    #[serde(default = "default_timeout_secs")]
    chart_request_timeout_secs: u64,
    #[serde(default)]
    chart_api_key: Option<String>,
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("./snapshots")
}

fn default_base_url() -> String {
    "https://api.notion.com/v1".to_string()
}

fn default_notion_version() -> String {
    "2022-06-28".to_string()
}

const fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}

const fn default_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let raw: RawConfig =
            envy::from_env().context("failed to parse CHART_* environment variables")?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let listen_addr = resolve_addr(
            raw.chart_listen_addr,
            raw.chart_listen_host,
            raw.chart_listen_port,
        )?;

        let encryption_key = raw
            .chart_encryption_key
            .filter(|key| !key.trim().is_empty());
        if encryption_key.is_none() && !raw.chart_insecure_default_key {
            bail!("CHART_ENCRYPTION_KEY must be set (or CHART_INSECURE_DEFAULT_KEY=true for local use)");
        }

        Ok(Self {
            listen_addr,
            snapshot_dir: raw.chart_snapshot_dir,
            encryption_key,
            insecure_default_key: raw.chart_insecure_default_key,
            notion_base_url: raw.chart_notion_base_url.trim_end_matches('/').to_string(),
            notion_version: raw.chart_notion_version,
            page_size: raw.chart_page_size.clamp(1, MAX_PAGE_SIZE),
            request_timeout: Duration::from_secs(raw.chart_request_timeout_secs.max(1)),
            api_key: raw.chart_api_key.filter(|key| !key.is_empty()),
        })
    }
}

fn resolve_addr(
    addr: Option<String>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<SocketAddr> {
    if let Some(addr) = addr {
        return addr
            .to_socket_addrs()
            .context("invalid CHART_LISTEN_ADDR value")?
            .next()
            .context("CHART_LISTEN_ADDR resolved to no addresses");
    }

    let host = host.unwrap_or_else(|| "0.0.0.0".to_string());
    let port = port.unwrap_or(8490);
    format!("{host}:{port}")
        .to_socket_addrs()
        .context("invalid listen host/port combination")?
        .next()
        .context("listen address resolved to no targets")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: &[&str] = &[
        "CHART_LISTEN_ADDR",
        "CHART_LISTEN_HOST",
        "CHART_LISTEN_PORT",
        "CHART_SNAPSHOT_DIR",
        "CHART_ENCRYPTION_KEY",
        "CHART_INSECURE_DEFAULT_KEY",
        "CHART_NOTION_BASE_URL",
        "CHART_NOTION_VERSION",
        "CHART_PAGE_SIZE",
        "CHART_REQUEST_TIMEOUT_SECS",
        "CHART_API_KEY",
    ];

    fn clear() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_when_key_is_present() {
        clear();
        env::set_var("CHART_ENCRYPTION_KEY", "s3cret");

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8490".parse::<SocketAddr>().unwrap());
        assert_eq!(config.snapshot_dir, PathBuf::from("./snapshots"));
        assert_eq!(config.notion_base_url, "https://api.notion.com/v1");
        assert_eq!(config.notion_version, "2022-06-28");
        assert_eq!(config.page_size, 100);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.api_key, None);
        clear();
    }

    #[test]
    #[serial]
    fn missing_key_requires_explicit_insecure_flag() {
        clear();
        assert!(AppConfig::from_env().is_err());

        env::set_var("CHART_INSECURE_DEFAULT_KEY", "true");
        let config = AppConfig::from_env().unwrap();
        assert!(config.insecure_default_key);
        assert_eq!(config.encryption_key, None);
        clear();
    }

    #[test]
    #[serial]
    fn page_size_is_clamped_and_listen_parts_combine() {
        clear();
        env::set_var("CHART_ENCRYPTION_KEY", "k");
        env::set_var("CHART_PAGE_SIZE", "500");
        env::set_var("CHART_LISTEN_HOST", "127.0.0.1");
        env::set_var("CHART_LISTEN_PORT", "9000");
        env::set_var("CHART_NOTION_BASE_URL", "http://localhost:1234/v1/");

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.listen_addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.notion_base_url, "http://localhost:1234/v1");

        env::set_var("CHART_PAGE_SIZE", "0");
        assert_eq!(AppConfig::from_env().unwrap().page_size, 1);
        clear();
    }
}
