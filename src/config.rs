use anyhow::{Context, bail};
use axum::http::StatusCode;
use reqwest::Url;
use serde_derive::Deserialize;
use serde_inline_default::serde_inline_default;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[serde_inline_default]
#[derive(Debug, Deserialize, Eq, PartialEq, Clone)]
pub struct Config {
    #[serde_inline_default(defaults::bind())]
    pub bind: String,

    #[serde_inline_default(defaults::port())]
    pub port: u16,

    /// Reports larger than this are answered with 413 before decoding.
    #[serde_inline_default(defaults::max_body_bytes())]
    pub max_body_bytes: usize,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub filter: FilterConfig,
}

#[serde_inline_default]
#[derive(Debug, Deserialize, Eq, PartialEq, Clone)]
pub struct UpstreamConfig {
    /// Sentry security endpoint, project and key embedded in the query.
    #[serde(default)]
    pub url: String,

    #[serde_inline_default(defaults::success_status())]
    #[serde(with = "http_serde::status_code")]
    pub success_status: StatusCode,

    #[serde_inline_default(defaults::timeout_secs())]
    pub timeout_secs: u64,
}

#[serde_inline_default]
#[derive(Debug, Deserialize, Eq, PartialEq, Clone)]
pub struct FilterConfig {
    #[serde_inline_default(defaults::scheme_allowlist())]
    pub scheme_allowlist: Vec<String>,

    #[serde_inline_default(defaults::pseudo_scheme_blocklist())]
    pub pseudo_scheme_blocklist: Vec<String>,

    #[serde_inline_default(defaults::hostname_blocklist())]
    pub hostname_blocklist: Vec<String>,
}

mod defaults {
    use axum::http::StatusCode;

    pub(super) fn bind() -> String {
        "0.0.0.0".to_string()
    }

    pub(super) fn port() -> u16 {
        8080
    }

    pub(super) fn max_body_bytes() -> usize {
        64 * 1024
    }

    pub(super) fn success_status() -> StatusCode {
        StatusCode::CREATED
    }

    pub(super) fn timeout_secs() -> u64 {
        10
    }

    pub(super) fn scheme_allowlist() -> Vec<String> {
        to_strings(&["http", "https"])
    }

    pub(super) fn pseudo_scheme_blocklist() -> Vec<String> {
        to_strings(&["inline", "eval", "about", "blob"])
    }

    // Browser extensions, ad injectors and filtering proxies seen in the wild.
    pub(super) fn hostname_blocklist() -> Vec<String> {
        to_strings(&[
            "data1.klastaf.com",
            "data1.pictdog.com",
            "cardinaldata.net",
            "promclickapp.biz",
            "gateway.zscalertwo.net",
            "lowffdompro.com",
            "data1.biilut.com",
            "data1.bmi-result.com",
            "mstat.acestream.net",
            "mc.yandex.ru",
            "block.opendns.com",
        ])
    }

    fn to_strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: defaults::bind(),
            port: defaults::port(),
            max_body_bytes: defaults::max_body_bytes(),
            upstream: UpstreamConfig::default(),
            filter: FilterConfig::default(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            url: String::new(),
            success_status: defaults::success_status(),
            timeout_secs: defaults::timeout_secs(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            scheme_allowlist: defaults::scheme_allowlist(),
            pseudo_scheme_blocklist: defaults::pseudo_scheme_blocklist(),
            hostname_blocklist: defaults::hostname_blocklist(),
        }
    }
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Checks what the server cannot start without.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.upstream.parsed_url()?;
        if self.upstream.timeout_secs == 0 {
            bail!("upstream.timeout_secs must be greater than zero");
        }
        Ok(())
    }
}

impl UpstreamConfig {
    pub fn parsed_url(&self) -> anyhow::Result<Url> {
        if self.url.is_empty() {
            bail!("no upstream url configured, set upstream.url or CSP_FORWARDER_UPSTREAM_URL");
        }
        let url = Url::parse(&self.url).context("upstream.url is not a valid url")?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("upstream.url must use http or https, got {}", url.scheme());
        }
        Ok(url)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let content = fs::read_to_string(path)?;
    let res = toml::from_str(&content)?;
    Ok(res)
}

/// Like [`load`], but a missing file yields the built-in defaults.
pub fn load_or_default(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }
    load(path).with_context(|| format!("failed to load config from {}", path.display()))
}
