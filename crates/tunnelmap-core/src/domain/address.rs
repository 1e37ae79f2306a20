//! Address inference for cross-master tunnels.
//!
//! A server usually listens on a wildcard bind (`0.0.0.0:10000`, `[::]:10000`)
//! which means nothing to a client on another host.  When a client is wired
//! to a server owned by a different master, the client instead dials the host
//! it would use to reach that master's control API, combined with the
//! server's listen port:
//!
//! ```text
//! server tunnel address   0.0.0.0:10000
//! owning master API URL   https://master1.example.com:9090/api
//! client tunnel address   master1.example.com:10000
//! ```
//!
//! A server pinned to a concrete host keeps that host.  When no port can be
//! found the server's raw address is handed back as
//! [`ClientAddress::Unresolved`] so the caller can flag the client instead of
//! inventing a port.
//!
//! This module also holds the one-shot `targetAddress` copy between a
//! server/client and the target it delivers to.

use std::net::IpAddr;

use url::Url;

use crate::domain::master::MasterConfig;
use crate::domain::node::Node;

/// Result of inferring a client's tunnel address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAddress {
    /// A reachable `host:port`.
    Resolved(String),
    /// No port could be determined; `raw` is the server's configured address.
    Unresolved { raw: String },
}

impl ClientAddress {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ClientAddress::Resolved(_))
    }
}

/// Computes the address a client must dial to reach `server`, owned by the
/// master described by `master`.
///
/// Deterministic and idempotent: the same inputs always produce the same
/// output.
pub fn resolve_client_tunnel_address(server: &Node, master: &MasterConfig) -> ClientAddress {
    let raw = server.data.tunnel_address.trim();
    let (host, port) = split_host_port(raw);

    let host = match host {
        Some(h) if is_wildcard_host(&h) => api_host(&master.api_url),
        Some(h) => Some(h),
        None => api_host(&master.api_url),
    };

    match (host, port) {
        (Some(host), Some(port)) => ClientAddress::Resolved(format!("{}:{port}", format_host(&host))),
        _ => ClientAddress::Unresolved {
            raw: raw.to_string(),
        },
    }
}

/// Splits `host:port`, `[v6]:port`, `:port`, a bare port or a bare host.
///
/// An empty host is reported as `None`.  An unbracketed IPv6 literal is taken
/// as a host without a port.
pub fn split_host_port(address: &str) -> (Option<String>, Option<u16>) {
    let address = address.trim();
    if address.is_empty() {
        return (None, None);
    }

    if let Some(rest) = address.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, tail)) => {
                let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
                (non_empty(host), port)
            }
            None => (non_empty(rest), None),
        };
    }

    if address.chars().all(|c| c.is_ascii_digit()) {
        return (None, address.parse().ok());
    }

    match address.matches(':').count() {
        0 => (non_empty(address), None),
        1 => {
            let (host, port) = address.split_once(':').unwrap_or((address, ""));
            (non_empty(host), port.parse().ok())
        }
        _ => (non_empty(address), None),
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Returns `true` for unspecified bind addresses such as `0.0.0.0` and `::`.
pub fn is_wildcard_host(host: &str) -> bool {
    host.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(|ip| ip.is_unspecified())
        .unwrap_or(false)
}

/// Wraps IPv6 literals in brackets so the host can be followed by `:port`.
pub fn format_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

/// Hostname portion of a control API URL, without IPv6 brackets.
///
/// URLs without a scheme are read as `http://…`.
pub fn api_host(api_url: &str) -> Option<String> {
    let api_url = api_url.trim();
    let parsed = Url::parse(api_url)
        .ok()
        .filter(|u| u.has_host())
        .or_else(|| Url::parse(&format!("http://{api_url}")).ok())?;
    let host = parsed.host_str()?;
    non_empty(host.trim_start_matches('[').trim_end_matches(']'))
}

/// Which side wins when both ends of a delivery edge hold a target address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPreference {
    /// The server/client side wins (edge creation, upstream edits).
    Upstream,
    /// The target side wins (target edits).
    Target,
}

/// Copies a target address once between an upstream server/client value and
/// a target node value.
///
/// The preferred side propagates when it is non-empty and differs; otherwise a
/// non-empty value on the other side is copied back into the empty preferred
/// side.  Returns `true` if either value changed.
pub fn sync_target_address(
    upstream: &mut String,
    target: &mut String,
    prefer: SyncPreference,
) -> bool {
    let (preferred, other) = match prefer {
        SyncPreference::Upstream => (upstream, target),
        SyncPreference::Target => (target, upstream),
    };

    if !preferred.trim().is_empty() {
        if preferred != other {
            other.clone_from(preferred);
            return true;
        }
        return false;
    }
    if !other.trim().is_empty() {
        preferred.clone_from(other);
        return true;
    }
    false
}

// ── Tests ─────────────────────────────────────────────────────────────────────
