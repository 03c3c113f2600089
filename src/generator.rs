//! Caddy configuration document generation
//!
//! Turns the full set of proxy hosts into one JSON document for Caddy's
//! `/load` endpoint: a single HTTP server listening on `:80` and `:443`
//! with one route per enabled host.
//!
//! Each route's handler chain is assembled in a fixed order:
//!
//! ```text
//! crowdsec? -> vars (local only)? -> acl? -> geoip? -> authentication?
//!   -> forward_auth? -> rate_limit? -> coraza? -> headers -> reverse_proxy
//! ```
//!
//! The optional stages live in [`OPTIONAL_STAGES`]; headers and reverse
//! proxy are always appended last. Generation is pure and deterministic.

use crate::models::{split_list, ForwardAuthProvider, ProxyHost, RateLimitPreset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the single server block
pub const SERVER_NAME: &str = "srv0";

/// Addresses the server block listens on
pub const LISTEN_ADDRESSES: [&str; 2] = [":80", ":443"];

/// RFC 1918 ranges trusted by the local-only stage
pub const PRIVATE_RANGES: [&str; 3] = ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"];

const DEFAULT_RATE: &str = "100";
const DEFAULT_WINDOW: &str = "1m";

/// Top-level document pushed to the Caddy admin API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub apps: Apps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Apps {
    pub http: HttpApp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpApp {
    pub servers: BTreeMap<String, Server>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub listen: Vec<String>,
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(rename = "match")]
    pub matchers: Vec<HostMatcher>,
    pub handle: Vec<Handler>,
    /// Stop route matching after this route
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostMatcher {
    pub host: Vec<String>,
}

/// One stage of a route's handler chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "handler", rename_all = "snake_case")]
pub enum Handler {
    Crowdsec,
    Vars {
        root: VarsRoot,
    },
    Acl {
        #[serde(skip_serializing_if = "Option::is_none")]
        allow: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        deny: Option<Vec<String>>,
    },
    Geoip {
        allow: Vec<String>,
    },
    Authentication {
        providers: AuthProviders,
    },
    ForwardAuth {
        uri: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        copy_headers: Option<Vec<String>>,
    },
    RateLimit {
        rate: String,
        window: String,
    },
    Coraza {
        rule_set: String,
    },
    Headers {
        response: HeaderOps,
    },
    ReverseProxy {
        upstreams: Vec<Upstream>,
        #[serde(skip_serializing_if = "Option::is_none")]
        transport: Option<Transport>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarsRoot {
    pub trusted_proxy: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthProviders {
    pub http_basic: HttpBasic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpBasic {
    pub realm: String,
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderOps {
    pub set: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    pub dial: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transport {
    pub protocol: String,
    pub tls: TransportTls,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportTls {
    pub client_certificate_authorities: Vec<String>,
}

/// Builds one optional stage, or nothing when the feature is off
pub type StageBuilder = fn(&ProxyHost) -> Option<Handler>;

/// Feature-gated stages in chain order
pub const OPTIONAL_STAGES: [StageBuilder; 8] = [
    crowdsec_stage,
    local_only_stage,
    ip_acl_stage,
    geo_block_stage,
    basic_auth_stage,
    forward_auth_stage,
    rate_limit_stage,
    waf_stage,
];

/// Build the full document from hosts in store order
pub fn build_document(hosts: &[ProxyHost]) -> Document {
    let server = Server {
        listen: LISTEN_ADDRESSES.iter().map(|s| s.to_string()).collect(),
        routes: hosts.iter().filter(|h| h.enabled).map(build_route).collect(),
    };

    let mut servers = BTreeMap::new();
    servers.insert(SERVER_NAME.to_string(), server);

    Document {
        apps: Apps {
            http: HttpApp { servers },
        },
    }
}

/// Build the route for a single host, regardless of its enabled flag
pub fn build_route(host: &ProxyHost) -> Route {
    let handle = OPTIONAL_STAGES
        .iter()
        .filter_map(|stage| stage(host))
        .chain([headers_stage(host), reverse_proxy_stage(host)])
        .collect();

    Route {
        matchers: vec![HostMatcher { host: host.domains() }],
        handle,
        terminal: host.ssl_enabled.then_some(true),
    }
}

fn crowdsec_stage(host: &ProxyHost) -> Option<Handler> {
    host.crowdsec_enabled.then_some(Handler::Crowdsec)
}

fn local_only_stage(host: &ProxyHost) -> Option<Handler> {
    host.local_only_enabled.then(|| Handler::Vars {
        root: VarsRoot {
            trusted_proxy: PRIVATE_RANGES.iter().map(|s| s.to_string()).collect(),
        },
    })
}

fn ip_acl_stage(host: &ProxyHost) -> Option<Handler> {
    let allow = (!host.ip_whitelist.is_empty()).then(|| split_list(&host.ip_whitelist));
    let deny = (!host.ip_blacklist.is_empty()).then(|| split_list(&host.ip_blacklist));
    if allow.is_none() && deny.is_none() {
        return None;
    }
    Some(Handler::Acl { allow, deny })
}

fn geo_block_stage(host: &ProxyHost) -> Option<Handler> {
    if !host.geo_block_enabled || host.geo_allowed_countries.is_empty() {
        return None;
    }
    let allow = split_list(&host.geo_allowed_countries)
        .into_iter()
        .map(|c| c.to_uppercase())
        .collect();
    Some(Handler::Geoip { allow })
}

fn basic_auth_stage(host: &ProxyHost) -> Option<Handler> {
    host.basic_auth_enabled.then(|| Handler::Authentication {
        providers: AuthProviders {
            http_basic: HttpBasic {
                realm: "Restricted".to_string(),
                accounts: vec![Account {
                    username: host.basic_auth_username.clone(),
                    password: host.basic_auth_password.clone(),
                }],
            },
        },
    })
}

fn forward_auth_stage(host: &ProxyHost) -> Option<Handler> {
    if !host.forward_auth_enabled {
        return None;
    }
    let copy_headers = ForwardAuthProvider::parse(&host.forward_auth_type)
        .and_then(|p| p.copy_headers())
        .map(|headers| headers.iter().map(|h| h.to_string()).collect());
    Some(Handler::ForwardAuth {
        uri: host.forward_auth_url.clone(),
        copy_headers,
    })
}

fn rate_limit_stage(host: &ProxyHost) -> Option<Handler> {
    if !host.rate_limit_enabled {
        return None;
    }
    let (rate, window) = resolve_rate_limit(&host.rate_limit_preset, &host.rate_limit_custom);
    Some(Handler::RateLimit { rate, window })
}

/// Resolve `(rate, window)` for a preset.
///
/// Unknown presets and unusable custom payloads fall back to 100 per minute.
pub fn resolve_rate_limit(preset: &str, custom: &str) -> (String, String) {
    let (rate, window) = match RateLimitPreset::parse(preset) {
        Some(RateLimitPreset::Login) => ("5", "1m"),
        Some(RateLimitPreset::Api) => ("60", "1m"),
        Some(RateLimitPreset::Standard) => (DEFAULT_RATE, DEFAULT_WINDOW),
        Some(RateLimitPreset::Custom) => {
            if let Some(parsed) = parse_custom_rate_limit(custom) {
                return parsed;
            }
            (DEFAULT_RATE, DEFAULT_WINDOW)
        }
        None => (DEFAULT_RATE, DEFAULT_WINDOW),
    };
    (rate.to_string(), window.to_string())
}

fn parse_custom_rate_limit(payload: &str) -> Option<(String, String)> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    let rate = scalar_text(value.get("rate")?)?;
    let window = scalar_text(value.get("window")?)?;
    Some((rate, window))
}

fn scalar_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn waf_stage(host: &ProxyHost) -> Option<Handler> {
    host.waf_enabled.then(|| Handler::Coraza {
        rule_set: host.waf_rule_set.clone(),
    })
}

fn headers_stage(host: &ProxyHost) -> Handler {
    let mut set = BTreeMap::new();

    if host.hsts_enabled {
        let mut hsts = format!("max-age={}", host.hsts_max_age);
        if host.hsts_preload {
            hsts.push_str("; includeSubDomains; preload");
        }
        set.insert("Strict-Transport-Security".to_string(), vec![hsts]);
    }
    if host.csp_enabled && !host.csp_directive.is_empty() {
        set.insert("Content-Security-Policy".to_string(), vec![host.csp_directive.clone()]);
    }
    if !host.x_frame_options.is_empty() {
        set.insert("X-Frame-Options".to_string(), vec![host.x_frame_options.clone()]);
    }
    if !host.referrer_policy.is_empty() {
        set.insert("Referrer-Policy".to_string(), vec![host.referrer_policy.clone()]);
    }
    set.insert("X-Content-Type-Options".to_string(), vec!["nosniff".to_string()]);
    set.insert("X-XSS-Protection".to_string(), vec!["1; mode=block".to_string()]);

    Handler::Headers {
        response: HeaderOps { set },
    }
}

fn reverse_proxy_stage(host: &ProxyHost) -> Handler {
    let transport = (host.mtls_enabled && !host.mtls_client_ca.is_empty()).then(|| Transport {
        protocol: "http".to_string(),
        tls: TransportTls {
            client_certificate_authorities: vec![host.mtls_client_ca.clone()],
        },
    });

    Handler::ReverseProxy {
        upstreams: vec![Upstream { dial: host.upstream() }],
        transport,
    }
}
