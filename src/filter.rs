//! Decides whether a CSP report is worth sending to Sentry.
//!
//! Most reports are produced by browser extensions and ad injectors that
//! load resources into the page, which the site cannot do anything about.
//! The filter drops those based on the blocked URI alone. All of its
//! knowledge lives in three lists from [`FilterConfig`], so new noise
//! sources are a config change.

use crate::config::FilterConfig;
#[cfg(test)]
use crate::csp::Report;
use reqwest::Url;
use std::collections::HashSet;
use std::fmt;

/// Why a report was not forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Noise {
    EmptyUri,
    Unparseable,
    PseudoScheme,
    Scheme,
    Hostname,
}

impl fmt::Display for Noise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Noise::EmptyUri => "empty blocked-uri",
            Noise::Unparseable => "unparseable blocked-uri",
            Noise::PseudoScheme => "pseudo-scheme blocked-uri",
            Noise::Scheme => "scheme not allowed",
            Noise::Hostname => "hostname blocklisted",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone)]
pub struct ForwardingFilter {
    scheme_allowlist: HashSet<String>,
    pseudo_scheme_blocklist: HashSet<String>,
    hostname_blocklist: HashSet<String>,
}

impl ForwardingFilter {
    pub fn new(config: &FilterConfig) -> ForwardingFilter {
        // Url lowercases scheme and host, so the lists have to be as well.
        // Pseudo-schemes are compared against the raw value and stay as is.
        ForwardingFilter {
            scheme_allowlist: lowercase(&config.scheme_allowlist),
            pseudo_scheme_blocklist: config.pseudo_scheme_blocklist.iter().cloned().collect(),
            hostname_blocklist: lowercase(&config.hostname_blocklist),
        }
    }

    #[cfg(test)]
    pub fn should_forward(&self, report: &Report) -> bool {
        self.check(report.blocked_uri()).is_ok()
    }

    /// Runs the rules in order and names the first one that rejects `blocked_uri`.
    pub fn check(&self, blocked_uri: &str) -> Result<(), Noise> {
        if blocked_uri.is_empty() {
            return Err(Noise::EmptyUri);
        }

        let uri = parse_blocked_uri(blocked_uri).ok_or(Noise::Unparseable)?;

        if self.pseudo_scheme_blocklist.contains(blocked_uri) {
            return Err(Noise::PseudoScheme);
        }

        if !self.scheme_allowlist.contains(uri.scheme()) {
            return Err(Noise::Scheme);
        }

        // "mc.yandex.ru." names the same host as "mc.yandex.ru".
        let host = uri.host_str().unwrap_or_default();
        let host = host.strip_suffix('.').unwrap_or(host);
        if self.hostname_blocklist.contains(host) {
            return Err(Noise::Hostname);
        }

        Ok(())
    }

    pub fn list_sizes(&self) -> (usize, usize, usize) {
        (
            self.scheme_allowlist.len(),
            self.pseudo_scheme_blocklist.len(),
            self.hostname_blocklist.len(),
        )
    }
}

fn lowercase(values: &[String]) -> HashSet<String> {
    values.iter().map(|v| v.to_lowercase()).collect()
}

/// Parses an absolute URI, rejecting stray `%` escapes that `Url` would
/// otherwise keep as literal text.
///
/// Pseudo-values like `eval` are not absolute URIs and fail here already,
/// which is fine: both outcomes mean the report is dropped.
fn parse_blocked_uri(value: &str) -> Option<Url> {
    if !has_valid_escapes(value) {
        return None;
    }
    Url::parse(value).ok()
}

fn has_valid_escapes(value: &str) -> bool {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let escape = bytes.get(i + 1..i + 3);
            match escape {
                Some([hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => i += 3,
                _ => return false,
            }
        } else {
            i += 1;
        }
    }
    true
}
