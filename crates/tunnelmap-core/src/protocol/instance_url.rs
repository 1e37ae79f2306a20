//! Instance URL encoding.
//!
//! A control API receives every tunnel instance as a single URL string:
//!
//! ```text
//! <scheme>://[<key>@]<tunnel address>/<target address>[?log=..][&tls=..][&crt=..][&key=..][&min=..][&max=..]
//! ```
//!
//! Parameters that equal the receiving side's default are left out, so an
//! instance built with no explicit options is just
//! `server://0.0.0.0:10000/127.0.0.1:8080`.
//!
//! | Parameter | Present when                                                |
//! |-----------|-------------------------------------------------------------|
//! | `log`     | an explicit level differing from the master's default        |
//! | `tls`     | servers: `0` or `2`; clients: `1` or `2`                     |
//! | `crt/key` | `tls=2` is emitted and the path is non-empty; percent-encoded |
//! | `min/max` | client instances only, explicitly set and greater than zero  |

use std::fmt::Write as _;

use thiserror::Error;

use crate::domain::master::MasterConfig;
use crate::domain::node::{LogLevel, Node, NodeData, NodeRole, TlsMode};

/// Errors returned by [`parse_instance_url`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InstanceUrlError {
    #[error("unknown instance scheme '{0}', expected server:// or client://")]
    UnknownScheme(String),

    #[error("instance URL '{0}' has no '/' between tunnel and target address")]
    MissingSeparator(String),

    #[error("invalid value '{value}' for parameter '{key}'")]
    InvalidValue { key: String, value: String },
}

/// Which kind of tunnel instance a URL describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstanceRole {
    Server,
    Client,
}

impl InstanceRole {
    pub fn scheme(self) -> &'static str {
        match self {
            InstanceRole::Server => "server",
            InstanceRole::Client => "client",
        }
    }

    pub fn from_node_role(role: NodeRole) -> Option<Self> {
        match role {
            NodeRole::Server => Some(InstanceRole::Server),
            NodeRole::Client => Some(InstanceRole::Client),
            _ => None,
        }
    }

    pub fn node_role(self) -> NodeRole {
        match self {
            InstanceRole::Server => NodeRole::Server,
            InstanceRole::Client => NodeRole::Client,
        }
    }

    /// TLS mode the instance applies when the URL carries no `tls` parameter.
    fn silent_tls_default(self) -> TlsMode {
        match self {
            InstanceRole::Server => TlsMode::SelfSigned,
            InstanceRole::Client => TlsMode::Plain,
        }
    }
}

/// Structured form of an instance URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceParams {
    pub role: InstanceRole,
    pub tunnel_key: String,
    pub tunnel_address: String,
    pub target_address: String,
    pub log_level: LogLevel,
    pub tls_mode: TlsMode,
    pub cert_path: String,
    pub key_path: String,
    pub min_pool: Option<u32>,
    pub max_pool: Option<u32>,
}

impl InstanceParams {
    /// Collects the instance parameters of a server or client node.
    ///
    /// Returns `None` for every other role.
    pub fn from_node(node: &Node) -> Option<Self> {
        let role = InstanceRole::from_node_role(node.role)?;
        let data = &node.data;
        Some(Self {
            role,
            tunnel_key: data.tunnel_key.trim().to_string(),
            tunnel_address: data.tunnel_address.trim().to_string(),
            target_address: data.target_address.trim().to_string(),
            log_level: data.log_level,
            tls_mode: data.tls_mode,
            cert_path: data.cert_path.trim().to_string(),
            key_path: data.key_path.trim().to_string(),
            min_pool: data.min_pool,
            max_pool: data.max_pool,
        })
    }

    /// Writes the parameters into a node's editable fields.
    pub fn apply_to(&self, data: &mut NodeData) {
        data.tunnel_key.clone_from(&self.tunnel_key);
        data.tunnel_address.clone_from(&self.tunnel_address);
        data.target_address.clone_from(&self.target_address);
        data.log_level = self.log_level;
        data.tls_mode = self.tls_mode;
        data.cert_path.clone_from(&self.cert_path);
        data.key_path.clone_from(&self.key_path);
        data.min_pool = self.min_pool;
        data.max_pool = self.max_pool;
    }
}

/// Encodes `params` for submission to the control API described by `master`.
pub fn build_instance_url(params: &InstanceParams, master: &MasterConfig) -> String {
    let mut url = format!("{}://", params.role.scheme());
    if !params.tunnel_key.is_empty() {
        url.push_str(&params.tunnel_key);
        url.push('@');
    }
    url.push_str(&params.tunnel_address);
    url.push('/');
    url.push_str(&params.target_address);

    let mut query: Vec<(&str, String)> = Vec::new();

    if params.log_level != master.default_log_level {
        if let Some(level) = params.log_level.as_query() {
            query.push(("log", level.to_string()));
        }
    }

    let emit_tls = params.tls_mode != TlsMode::Inherit
        && params.tls_mode != params.role.silent_tls_default();
    if emit_tls {
        if let Some(code) = params.tls_mode.code() {
            query.push(("tls", code.to_string()));
        }
        if params.tls_mode == TlsMode::Custom {
            if !params.cert_path.is_empty() {
                query.push(("crt", urlencoding::encode(&params.cert_path).into_owned()));
            }
            if !params.key_path.is_empty() {
                query.push(("key", urlencoding::encode(&params.key_path).into_owned()));
            }
        }
    }

    if params.role == InstanceRole::Client {
        if let Some(min) = params.min_pool.filter(|n| *n > 0) {
            query.push(("min", min.to_string()));
        }
        if let Some(max) = params.max_pool.filter(|n| *n > 0) {
            query.push(("max", max.to_string()));
        }
    }

    for (i, (key, value)) in query.iter().enumerate() {
        let sep = if i == 0 { '?' } else { '&' };
        // Writing into a String cannot fail.
        let _ = write!(url, "{sep}{key}={value}");
    }
    url
}

/// Decodes an instance URL reported by a control API.
///
/// Unknown query parameters are ignored.  Absent `log`/`tls` parameters
/// decode as [`LogLevel::Inherit`] / [`TlsMode::Inherit`].
///
/// # Errors
///
/// - [`InstanceUrlError::UnknownScheme`] for anything but `server`/`client`.
/// - [`InstanceUrlError::MissingSeparator`] when no `/` follows the tunnel address.
/// - [`InstanceUrlError::InvalidValue`] for malformed `log`, `tls`, `min` or `max`.
pub fn parse_instance_url(input: &str) -> Result<InstanceParams, InstanceUrlError> {
    let input = input.trim();
    let (scheme, rest) = input
        .split_once("://")
        .ok_or_else(|| InstanceUrlError::UnknownScheme(input.to_string()))?;
    let role = match scheme.to_ascii_lowercase().as_str() {
        "server" => InstanceRole::Server,
        "client" => InstanceRole::Client,
        other => return Err(InstanceUrlError::UnknownScheme(other.to_string())),
    };

    let (body, query) = rest.split_once('?').unwrap_or((rest, ""));
    let (authority, target_address) = body
        .split_once('/')
        .ok_or_else(|| InstanceUrlError::MissingSeparator(input.to_string()))?;
    let (tunnel_key, tunnel_address) = match authority.rsplit_once('@') {
        Some((key, address)) => (key.to_string(), address.to_string()),
        None => (String::new(), authority.to_string()),
    };

    let mut params = InstanceParams {
        role,
        tunnel_key,
        tunnel_address,
        target_address: target_address.to_string(),
        log_level: LogLevel::Inherit,
        tls_mode: TlsMode::Inherit,
        cert_path: String::new(),
        key_path: String::new(),
        min_pool: None,
        max_pool: None,
    };

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let invalid = || InstanceUrlError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        match key {
            "log" => params.log_level = value.parse().map_err(|_| invalid())?,
            "tls" => params.tls_mode = TlsMode::from_code(value).ok_or_else(invalid)?,
            "crt" => params.cert_path = urlencoding::decode(value).map_err(|_| invalid())?.into_owned(),
            "key" => params.key_path = urlencoding::decode(value).map_err(|_| invalid())?.into_owned(),
            "min" => params.min_pool = Some(value.parse().map_err(|_| invalid())?),
            "max" => params.max_pool = Some(value.parse().map_err(|_| invalid())?),
            _ => {}
        }
    }

    Ok(params)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn master() -> MasterConfig {
        MasterConfig::new("m1", "https://m1.example.com/api").with_api_key("k")
    }

    fn params(role: InstanceRole) -> InstanceParams {
        InstanceParams {
            role,
            tunnel_key: String::new(),
            tunnel_address: "0.0.0.0:10000".into(),
            target_address: "127.0.0.1:8080".into(),
            log_level: LogLevel::Inherit,
            tls_mode: TlsMode::Inherit,
            cert_path: String::new(),
            key_path: String::new(),
            min_pool: None,
            max_pool: None,
        }
    }

    // ── build_instance_url ────────────────────────────────────────────────────

    #[test]
    fn test_minimal_server_url_has_no_query() {
        let url = build_instance_url(&params(InstanceRole::Server), &master());
        assert_eq!(url, "server://0.0.0.0:10000/127.0.0.1:8080");
    }

    #[test]
    fn test_tunnel_key_is_prefixed_with_at_sign() {
        let mut p = params(InstanceRole::Client);
        p.tunnel_key = "s3cret".into();
        p.tunnel_address = "master1.example.com:10000".into();
        assert_eq!(
            build_instance_url(&p, &master()),
            "client://s3cret@master1.example.com:10000/127.0.0.1:8080"
        );
    }

    #[test]
    fn test_log_level_equal_to_master_default_is_omitted() {
        let mut p = params(InstanceRole::Server);
        p.log_level = LogLevel::Info;
        assert!(!build_instance_url(&p, &master()).contains("log="));

        p.log_level = LogLevel::Debug;
        assert!(build_instance_url(&p, &master()).ends_with("?log=debug"));
    }

    #[test]
    fn test_role_default_tls_values_are_omitted() {
        let mut server = params(InstanceRole::Server);
        server.tls_mode = TlsMode::SelfSigned;
        assert!(!build_instance_url(&server, &master()).contains("tls="));
        server.tls_mode = TlsMode::Plain;
        assert!(build_instance_url(&server, &master()).ends_with("?tls=0"));

        let mut client = params(InstanceRole::Client);
        client.tls_mode = TlsMode::Plain;
        assert!(!build_instance_url(&client, &master()).contains("tls="));
        client.tls_mode = TlsMode::SelfSigned;
        assert!(build_instance_url(&client, &master()).ends_with("?tls=1"));
    }

    #[test]
    fn test_certificate_paths_only_with_custom_tls() {
        let mut p = params(InstanceRole::Server);
        p.cert_path = "/etc/tunnel/cert.pem".into();
        p.key_path = "/etc/tunnel/key.pem".into();
        p.tls_mode = TlsMode::Plain;
        assert!(!build_instance_url(&p, &master()).contains("crt="));

        p.tls_mode = TlsMode::Custom;
        p.log_level = LogLevel::Warn;
        assert_eq!(
            build_instance_url(&p, &master()),
            "server://0.0.0.0:10000/127.0.0.1:8080?log=warn&tls=2&crt=%2Fetc%2Ftunnel%2Fcert.pem&key=%2Fetc%2Ftunnel%2Fkey.pem"
        );
    }

    #[test]
    fn test_pool_bounds_only_for_clients_and_positive_values() {
        let mut server = params(InstanceRole::Server);
        server.min_pool = Some(4);
        assert!(!build_instance_url(&server, &master()).contains("min="));

        let mut client = params(InstanceRole::Client);
        client.min_pool = Some(0);
        client.max_pool = Some(16);
        assert!(build_instance_url(&client, &master()).ends_with("?max=16"));
    }

    // ── parse_instance_url ────────────────────────────────────────────────────

    #[test]
    fn test_parse_full_client_url() {
        let parsed =
            parse_instance_url("client://k@h.example.com:10000/10.0.0.5:22?log=debug&tls=2&crt=/c&key=/k&min=2&max=8")
                .unwrap();
        assert_eq!(parsed.role, InstanceRole::Client);
        assert_eq!(parsed.tunnel_key, "k");
        assert_eq!(parsed.tunnel_address, "h.example.com:10000");
        assert_eq!(parsed.target_address, "10.0.0.5:22");
        assert_eq!(parsed.log_level, LogLevel::Debug);
        assert_eq!(parsed.tls_mode, TlsMode::Custom);
        assert_eq!(parsed.cert_path, "/c");
        assert_eq!(parsed.key_path, "/k");
        assert_eq!(parsed.min_pool, Some(2));
        assert_eq!(parsed.max_pool, Some(8));
    }

    #[test]
    fn test_parse_ignores_unknown_parameters() {
        let parsed = parse_instance_url("server://:10000/127.0.0.1:80?rate=100").unwrap();
        assert_eq!(parsed.tunnel_address, ":10000");
        assert_eq!(parsed.tls_mode, TlsMode::Inherit);
    }

    #[test]
    fn test_parse_rejects_unknown_scheme_and_missing_separator() {
        assert_eq!(
            parse_instance_url("master://x/y"),
            Err(InstanceUrlError::UnknownScheme("master".into()))
        );
        assert!(matches!(
            parse_instance_url("server://0.0.0.0:10000"),
            Err(InstanceUrlError::MissingSeparator(_))
        ));
    }

    #[test]
    fn test_parse_rejects_malformed_values() {
        assert_eq!(
            parse_instance_url("client://a:1/b:2?min=lots"),
            Err(InstanceUrlError::InvalidValue {
                key: "min".into(),
                value: "lots".into()
            })
        );
        assert!(parse_instance_url("client://a:1/b:2?tls=9").is_err());
    }

    #[test]
    fn test_built_url_decodes_to_the_same_parameters() {
        let mut p = params(InstanceRole::Client);
        p.tunnel_key = "k".into();
        p.log_level = LogLevel::Error;
        p.tls_mode = TlsMode::Custom;
        p.cert_path = "/c.pem".into();
        p.key_path = "/k.pem".into();
        p.max_pool = Some(32);

        let parsed = parse_instance_url(&build_instance_url(&p, &master())).unwrap();

        assert_eq!(parsed, p);
    }

    #[test]
    fn test_certificate_paths_with_reserved_characters_round_trip() {
        let mut p = params(InstanceRole::Server);
        p.tls_mode = TlsMode::Custom;
        p.cert_path = "/srv/certs/a&b #1.pem".into();
        p.key_path = "C:\\keys\\tunnel key=1.pem".into();

        let url = build_instance_url(&p, &master());
        let parsed = parse_instance_url(&url).unwrap();

        assert!(!url.contains(' '));
        assert!(!url.contains('#'));
        assert_eq!(url.matches('&').count(), 2);
        assert_eq!(parsed.cert_path, "/srv/certs/a&b #1.pem");
        assert_eq!(parsed.key_path, "C:\\keys\\tunnel key=1.pem");
    }

    #[test]
    fn test_from_node_only_accepts_tunnel_endpoints() {
        let target = Node::new(NodeRole::Target, "t");
        assert!(InstanceParams::from_node(&target).is_none());

        let client = Node::new(NodeRole::Client, "c").with_data(|d| {
            d.tunnel_address = " h:1 ".into();
            d.target_address = "t:2".into();
        });
        let p = InstanceParams::from_node(&client).unwrap();
        assert_eq!(p.role, InstanceRole::Client);
        assert_eq!(p.tunnel_address, "h:1");
    }
}
