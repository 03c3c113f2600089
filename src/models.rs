//! Proxy host records
//!
//! A proxy host maps one or more domains to an upstream `host:port` and
//! carries the toggles for every security feature that can be layered in
//! front of it. The JSON field names double as the admin API wire format and
//! the column names in the store.

use serde::{Deserialize, Serialize};

/// A configured domain-to-upstream mapping
///
/// Fields absent from an inbound JSON body take the same defaults the store
/// applies to its columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyHost {
    pub id: i64,
    /// Comma-separated list of domains
    pub domain_names: String,
    pub scheme: String,
    pub forward_host: String,
    pub forward_port: i64,

    // TLS
    pub ssl_enabled: bool,
    pub ssl_forced: bool,
    pub https_port: i64,
    pub dns_challenge: bool,
    pub dns_provider: String,
    pub dns_credentials: String,

    // Authentication
    pub basic_auth_enabled: bool,
    pub basic_auth_username: String,
    /// Stored pre-hashed; never hashed or checked here
    pub basic_auth_password: String,
    pub forward_auth_enabled: bool,
    pub forward_auth_url: String,
    /// authelia, authentik, pomerium or custom
    pub forward_auth_type: String,

    // Access control
    /// Comma-separated CIDR list
    pub ip_whitelist: String,
    /// Comma-separated CIDR list
    pub ip_blacklist: String,
    pub geo_block_enabled: bool,
    /// Comma-separated ISO country codes
    pub geo_allowed_countries: String,
    pub local_only_enabled: bool,

    // Security engines
    pub waf_enabled: bool,
    pub waf_rule_set: String,
    pub rate_limit_enabled: bool,
    /// login, api, standard or custom
    pub rate_limit_preset: String,
    /// JSON object with `rate` and `window` keys, used by the custom preset
    pub rate_limit_custom: String,

    // Security headers
    pub hsts_enabled: bool,
    pub hsts_max_age: i64,
    pub hsts_preload: bool,
    pub csp_enabled: bool,
    pub csp_directive: String,
    pub x_frame_options: String,
    pub referrer_policy: String,

    // mTLS
    pub mtls_enabled: bool,
    /// PEM encoded CA certificate
    pub mtls_client_ca: String,

    pub crowdsec_enabled: bool,

    /// Free-form Caddy directives, stored verbatim
    pub custom_caddy_config: String,
    pub enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Default for ProxyHost {
    fn default() -> Self {
        Self {
            id: 0,
            domain_names: String::new(),
            scheme: "http".to_string(),
            forward_host: String::new(),
            forward_port: 0,
            ssl_enabled: false,
            ssl_forced: false,
            https_port: 443,
            dns_challenge: false,
            dns_provider: String::new(),
            dns_credentials: String::new(),
            basic_auth_enabled: false,
            basic_auth_username: String::new(),
            basic_auth_password: String::new(),
            forward_auth_enabled: false,
            forward_auth_url: String::new(),
            forward_auth_type: String::new(),
            ip_whitelist: String::new(),
            ip_blacklist: String::new(),
            geo_block_enabled: false,
            geo_allowed_countries: String::new(),
            local_only_enabled: false,
            waf_enabled: false,
            waf_rule_set: "owasp-crs".to_string(),
            rate_limit_enabled: false,
            rate_limit_preset: String::new(),
            rate_limit_custom: String::new(),
            hsts_enabled: true,
            hsts_max_age: 31_536_000,
            hsts_preload: false,
            csp_enabled: false,
            csp_directive: String::new(),
            x_frame_options: "SAMEORIGIN".to_string(),
            referrer_policy: "strict-origin-when-cross-origin".to_string(),
            mtls_enabled: false,
            mtls_client_ca: String::new(),
            crowdsec_enabled: true,
            custom_caddy_config: String::new(),
            enabled: true,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }
}

impl ProxyHost {
    /// Minimal enabled host routing `domains` to `forward_host:forward_port`
    pub fn new(domains: &str, forward_host: &str, forward_port: i64) -> Self {
        Self {
            domain_names: domains.to_string(),
            forward_host: forward_host.to_string(),
            forward_port,
            ..Self::default()
        }
    }

    /// Check the fields required to route traffic
    pub fn validate(&self) -> Result<(), String> {
        if self.domain_names.trim().is_empty() {
            return Err("domain_names is required".to_string());
        }
        if self.forward_host.trim().is_empty() {
            return Err("forward_host is required".to_string());
        }
        if !(1..=65535).contains(&self.forward_port) {
            return Err(format!(
                "forward_port must be between 1 and 65535, got {}",
                self.forward_port
            ));
        }
        Ok(())
    }

    pub fn domains(&self) -> Vec<String> {
        split_list(&self.domain_names)
    }

    /// Upstream dial address
    pub fn upstream(&self) -> String {
        format!("{}:{}", self.forward_host, self.forward_port)
    }
}

/// Split a comma-separated field and trim every element.
///
/// Empty elements are kept: `"a.com,"` yields `["a.com", ""]`.
pub fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(|s| s.trim().to_string()).collect()
}

/// Forward authentication provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardAuthProvider {
    Authelia,
    Authentik,
    Pomerium,
    Custom,
}

impl ForwardAuthProvider {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "authelia" => Some(Self::Authelia),
            "authentik" => Some(Self::Authentik),
            "pomerium" => Some(Self::Pomerium),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Identity headers copied from the auth response to the upstream request
    pub fn copy_headers(&self) -> Option<&'static [&'static str]> {
        match self {
            Self::Authelia => Some(&["Remote-User", "Remote-Groups", "Remote-Name", "Remote-Email"]),
            Self::Authentik => Some(&[
                "X-authentik-username",
                "X-authentik-groups",
                "X-authentik-email",
                "X-authentik-name",
            ]),
            Self::Pomerium => Some(&[
                "X-Pomerium-Jwt-Assertion",
                "X-Pomerium-Claim-Email",
                "X-Pomerium-Claim-Groups",
            ]),
            Self::Custom => None,
        }
    }
}

/// Rate limit preset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitPreset {
    Login,
    Api,
    Standard,
    Custom,
}

impl RateLimitPreset {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "login" => Some(Self::Login),
            "api" => Some(Self::Api),
            "standard" => Some(Self::Standard),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// A known server that can be picked as an upstream
///
/// Addressed by `uuid` in the admin API. Remote servers are inventory only
/// and never appear in the generated Caddy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteServer {
    pub id: i64,
    pub uuid: String,
    pub name: String,
    /// docker, generic, ...
    pub provider: String,
    pub host: String,
    pub port: i64,
    pub username: String,
    pub enabled: bool,
    pub reachable: bool,
    pub last_checked: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Default for RemoteServer {
    fn default() -> Self {
        Self {
            id: 0,
            uuid: String::new(),
            name: String::new(),
            provider: "generic".to_string(),
            host: String::new(),
            port: 80,
            username: String::new(),
            enabled: true,
            reachable: false,
            last_checked: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }
}

impl RemoteServer {
    pub fn new(name: &str, host: &str, port: i64) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            port,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name is required".to_string());
        }
        if self.host.trim().is_empty() {
            return Err("host is required".to_string());
        }
        if !(1..=65535).contains(&self.port) {
            return Err(format!("port must be between 1 and 65535, got {}", self.port));
        }
        Ok(())
    }
}
