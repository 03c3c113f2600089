//! SQLite store for proxy hosts and remote servers
//!
//! Hosts survive restarts here; the Caddy document is always rebuilt from
//! this table and never persisted on its own.

use crate::models::{ProxyHost, RemoteServer};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Current schema version for migrations
const SCHEMA_VERSION: i32 = 2;

const SERVER_COLUMNS: &str = "id, uuid, name, provider, host, port, username,
    enabled, reachable, last_checked, created_at, updated_at";

const HOST_COLUMNS: &str = "id, domain_names, scheme, forward_host, forward_port,
    ssl_enabled, ssl_forced, https_port, dns_challenge, dns_provider, dns_credentials,
    basic_auth_enabled, basic_auth_username, basic_auth_password,
    forward_auth_enabled, forward_auth_url, forward_auth_type,
    ip_whitelist, ip_blacklist, geo_block_enabled, geo_allowed_countries, local_only_enabled,
    waf_enabled, waf_rule_set, rate_limit_enabled, rate_limit_preset, rate_limit_custom,
    hsts_enabled, hsts_max_age, hsts_preload, csp_enabled, csp_directive,
    x_frame_options, referrer_policy, mtls_enabled, mtls_client_ca,
    crowdsec_enabled, custom_caddy_config, enabled, created_at, updated_at";

/// Database connection wrapper with thread-safe access
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {}", parent.display()))?;
        }

        let conn = Connection::open(path).context("Failed to open database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < SCHEMA_VERSION {
            info!("Running migrations from v{} to v{}", current_version, SCHEMA_VERSION);

            if current_version < 1 {
                self.migrate_v1(&conn)?;
            }
            if current_version < 2 {
                self.migrate_v2(&conn)?;
            }
        }

        Ok(())
    }

    /// Migration v1: proxy hosts
    fn migrate_v1(&self, conn: &Connection) -> Result<()> {
        debug!("Applying migration v1: proxy hosts");

        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS proxy_hosts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain_names TEXT NOT NULL,
                scheme TEXT NOT NULL DEFAULT 'http',
                forward_host TEXT NOT NULL,
                forward_port INTEGER NOT NULL,

                ssl_enabled INTEGER NOT NULL DEFAULT 0,
                ssl_forced INTEGER NOT NULL DEFAULT 0,
                https_port INTEGER NOT NULL DEFAULT 443,
                dns_challenge INTEGER NOT NULL DEFAULT 0,
                dns_provider TEXT NOT NULL DEFAULT '',
                dns_credentials TEXT NOT NULL DEFAULT '',

                basic_auth_enabled INTEGER NOT NULL DEFAULT 0,
                basic_auth_username TEXT NOT NULL DEFAULT '',
                basic_auth_password TEXT NOT NULL DEFAULT '',
                forward_auth_enabled INTEGER NOT NULL DEFAULT 0,
                forward_auth_url TEXT NOT NULL DEFAULT '',
                forward_auth_type TEXT NOT NULL DEFAULT '',

                ip_whitelist TEXT NOT NULL DEFAULT '',
                ip_blacklist TEXT NOT NULL DEFAULT '',
                geo_block_enabled INTEGER NOT NULL DEFAULT 0,
                geo_allowed_countries TEXT NOT NULL DEFAULT '',
                local_only_enabled INTEGER NOT NULL DEFAULT 0,

                waf_enabled INTEGER NOT NULL DEFAULT 0,
                waf_rule_set TEXT NOT NULL DEFAULT 'owasp-crs',
                rate_limit_enabled INTEGER NOT NULL DEFAULT 0,
                rate_limit_preset TEXT NOT NULL DEFAULT '',
                rate_limit_custom TEXT NOT NULL DEFAULT '',

                hsts_enabled INTEGER NOT NULL DEFAULT 1,
                hsts_max_age INTEGER NOT NULL DEFAULT 31536000,
                hsts_preload INTEGER NOT NULL DEFAULT 0,
                csp_enabled INTEGER NOT NULL DEFAULT 0,
                csp_directive TEXT NOT NULL DEFAULT '',
                x_frame_options TEXT NOT NULL DEFAULT 'SAMEORIGIN',
                referrer_policy TEXT NOT NULL DEFAULT 'strict-origin-when-cross-origin',

                mtls_enabled INTEGER NOT NULL DEFAULT 0,
                mtls_client_ca TEXT NOT NULL DEFAULT '',

                crowdsec_enabled INTEGER NOT NULL DEFAULT 1,

                custom_caddy_config TEXT NOT NULL DEFAULT '',
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_proxy_hosts_enabled ON proxy_hosts(enabled);

            -- Record migration
            INSERT INTO schema_migrations (version) VALUES (1);
        "#)?;

        Ok(())
    }

    /// Migration v2: remote servers
    fn migrate_v2(&self, conn: &Connection) -> Result<()> {
        debug!("Applying migration v2: remote servers");

        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS remote_servers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                provider TEXT NOT NULL DEFAULT 'generic',
                host TEXT NOT NULL,
                port INTEGER NOT NULL DEFAULT 80,
                username TEXT NOT NULL DEFAULT '',
                enabled INTEGER NOT NULL DEFAULT 1,
                reachable INTEGER NOT NULL DEFAULT 0,
                last_checked TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_remote_servers_enabled ON remote_servers(enabled);

            INSERT INTO schema_migrations (version) VALUES (2);
        "#)?;

        Ok(())
    }

    // ==================== Proxy Host Operations ====================

    /// Insert a host and return it with its assigned id and timestamps.
    /// The id on `host` is ignored.
    pub fn create_host(&self, host: &ProxyHost) -> Result<ProxyHost> {
        let id = {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO proxy_hosts (
                    domain_names, scheme, forward_host, forward_port,
                    ssl_enabled, ssl_forced, https_port, dns_challenge, dns_provider, dns_credentials,
                    basic_auth_enabled, basic_auth_username, basic_auth_password,
                    forward_auth_enabled, forward_auth_url, forward_auth_type,
                    ip_whitelist, ip_blacklist, geo_block_enabled, geo_allowed_countries, local_only_enabled,
                    waf_enabled, waf_rule_set, rate_limit_enabled, rate_limit_preset, rate_limit_custom,
                    hsts_enabled, hsts_max_age, hsts_preload, csp_enabled, csp_directive,
                    x_frame_options, referrer_policy, mtls_enabled, mtls_client_ca,
                    crowdsec_enabled, custom_caddy_config, enabled
                ) VALUES (
                    :domain_names, :scheme, :forward_host, :forward_port,
                    :ssl_enabled, :ssl_forced, :https_port, :dns_challenge, :dns_provider, :dns_credentials,
                    :basic_auth_enabled, :basic_auth_username, :basic_auth_password,
                    :forward_auth_enabled, :forward_auth_url, :forward_auth_type,
                    :ip_whitelist, :ip_blacklist, :geo_block_enabled, :geo_allowed_countries, :local_only_enabled,
                    :waf_enabled, :waf_rule_set, :rate_limit_enabled, :rate_limit_preset, :rate_limit_custom,
                    :hsts_enabled, :hsts_max_age, :hsts_preload, :csp_enabled, :csp_directive,
                    :x_frame_options, :referrer_policy, :mtls_enabled, :mtls_client_ca,
                    :crowdsec_enabled, :custom_caddy_config, :enabled
                )",
                host_params(host).as_slice(),
            )
            .context("Failed to insert proxy host")?;
            conn.last_insert_rowid()
        };

        self.get_host(id)?
            .with_context(|| format!("Proxy host {} vanished after insert", id))
    }

    /// Get a host by id
    pub fn get_host(&self, id: i64) -> Result<Option<ProxyHost>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM proxy_hosts WHERE id = ?1", HOST_COLUMNS),
            params![id],
            host_from_row,
        )
        .optional()
        .context("Failed to get proxy host")
    }

    /// List hosts in id order, optionally only the enabled ones
    pub fn list_hosts(&self, enabled_only: bool) -> Result<Vec<ProxyHost>> {
        let conn = self.conn.lock();
        let sql = if enabled_only {
            format!("SELECT {} FROM proxy_hosts WHERE enabled = 1 ORDER BY id", HOST_COLUMNS)
        } else {
            format!("SELECT {} FROM proxy_hosts ORDER BY id", HOST_COLUMNS)
        };

        let mut stmt = conn.prepare(&sql)?;
        let hosts = stmt
            .query_map([], host_from_row)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list proxy hosts")?;

        Ok(hosts)
    }

    /// Overwrite every mutable column of an existing host.
    /// Returns false if no host has that id.
    pub fn update_host(&self, host: &ProxyHost) -> Result<bool> {
        let conn = self.conn.lock();
        let mut params = host_params(host);
        params.push((":id", &host.id as &dyn ToSql));

        let rows = conn
            .execute(
                "UPDATE proxy_hosts SET
                    domain_names = :domain_names, scheme = :scheme,
                    forward_host = :forward_host, forward_port = :forward_port,
                    ssl_enabled = :ssl_enabled, ssl_forced = :ssl_forced, https_port = :https_port,
                    dns_challenge = :dns_challenge, dns_provider = :dns_provider,
                    dns_credentials = :dns_credentials,
                    basic_auth_enabled = :basic_auth_enabled,
                    basic_auth_username = :basic_auth_username,
                    basic_auth_password = :basic_auth_password,
                    forward_auth_enabled = :forward_auth_enabled,
                    forward_auth_url = :forward_auth_url, forward_auth_type = :forward_auth_type,
                    ip_whitelist = :ip_whitelist, ip_blacklist = :ip_blacklist,
                    geo_block_enabled = :geo_block_enabled,
                    geo_allowed_countries = :geo_allowed_countries,
                    local_only_enabled = :local_only_enabled,
                    waf_enabled = :waf_enabled, waf_rule_set = :waf_rule_set,
                    rate_limit_enabled = :rate_limit_enabled,
                    rate_limit_preset = :rate_limit_preset,
                    rate_limit_custom = :rate_limit_custom,
                    hsts_enabled = :hsts_enabled, hsts_max_age = :hsts_max_age,
                    hsts_preload = :hsts_preload, csp_enabled = :csp_enabled,
                    csp_directive = :csp_directive, x_frame_options = :x_frame_options,
                    referrer_policy = :referrer_policy,
                    mtls_enabled = :mtls_enabled, mtls_client_ca = :mtls_client_ca,
                    crowdsec_enabled = :crowdsec_enabled,
                    custom_caddy_config = :custom_caddy_config, enabled = :enabled,
                    updated_at = datetime('now')
                 WHERE id = :id",
                params.as_slice(),
            )
            .context("Failed to update proxy host")?;

        Ok(rows > 0)
    }

    /// Set the enabled flag. Returns false if no host has that id.
    pub fn set_host_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "UPDATE proxy_hosts SET enabled = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![enabled, id],
        )?;
        Ok(rows > 0)
    }

    /// Delete a host. Returns false if no host has that id.
    pub fn delete_host(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM proxy_hosts WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // ==================== Remote Server Operations ====================

    /// Insert a server under its `uuid` and return the stored row
    pub fn create_remote_server(&self, server: &RemoteServer) -> Result<RemoteServer> {
        {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO remote_servers (uuid, name, provider, host, port, username, enabled, reachable, last_checked)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    server.uuid,
                    server.name,
                    server.provider,
                    server.host,
                    server.port,
                    server.username,
                    server.enabled,
                    server.reachable,
                    server.last_checked,
                ],
            )
            .context("Failed to insert remote server")?;
        }

        self.get_remote_server(&server.uuid)?
            .with_context(|| format!("Remote server {} vanished after insert", server.uuid))
    }

    pub fn get_remote_server(&self, uuid: &str) -> Result<Option<RemoteServer>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM remote_servers WHERE uuid = ?1", SERVER_COLUMNS),
            params![uuid],
            server_from_row,
        )
        .optional()
        .context("Failed to get remote server")
    }

    /// List servers in id order, optionally only the enabled ones
    pub fn list_remote_servers(&self, enabled_only: bool) -> Result<Vec<RemoteServer>> {
        let conn = self.conn.lock();
        let sql = if enabled_only {
            format!("SELECT {} FROM remote_servers WHERE enabled = 1 ORDER BY id", SERVER_COLUMNS)
        } else {
            format!("SELECT {} FROM remote_servers ORDER BY id", SERVER_COLUMNS)
        };

        let mut stmt = conn.prepare(&sql)?;
        let servers = stmt
            .query_map([], server_from_row)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list remote servers")?;

        Ok(servers)
    }

    /// Overwrite the mutable columns of the server with this `uuid`
    pub fn update_remote_server(&self, server: &RemoteServer) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE remote_servers SET
                    name = ?1, provider = ?2, host = ?3, port = ?4, username = ?5,
                    enabled = ?6, reachable = ?7, last_checked = ?8,
                    updated_at = datetime('now')
                 WHERE uuid = ?9",
                params![
                    server.name,
                    server.provider,
                    server.host,
                    server.port,
                    server.username,
                    server.enabled,
                    server.reachable,
                    server.last_checked,
                    server.uuid,
                ],
            )
            .context("Failed to update remote server")?;

        Ok(rows > 0)
    }

    pub fn delete_remote_server(&self, uuid: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM remote_servers WHERE uuid = ?1", params![uuid])?;
        Ok(rows > 0)
    }
}

fn host_params(host: &ProxyHost) -> Vec<(&'static str, &dyn ToSql)> {
    vec![
        (":domain_names", &host.domain_names),
        (":scheme", &host.scheme),
        (":forward_host", &host.forward_host),
        (":forward_port", &host.forward_port),
        (":ssl_enabled", &host.ssl_enabled),
        (":ssl_forced", &host.ssl_forced),
        (":https_port", &host.https_port),
        (":dns_challenge", &host.dns_challenge),
        (":dns_provider", &host.dns_provider),
        (":dns_credentials", &host.dns_credentials),
        (":basic_auth_enabled", &host.basic_auth_enabled),
        (":basic_auth_username", &host.basic_auth_username),
        (":basic_auth_password", &host.basic_auth_password),
        (":forward_auth_enabled", &host.forward_auth_enabled),
        (":forward_auth_url", &host.forward_auth_url),
        (":forward_auth_type", &host.forward_auth_type),
        (":ip_whitelist", &host.ip_whitelist),
        (":ip_blacklist", &host.ip_blacklist),
        (":geo_block_enabled", &host.geo_block_enabled),
        (":geo_allowed_countries", &host.geo_allowed_countries),
        (":local_only_enabled", &host.local_only_enabled),
        (":waf_enabled", &host.waf_enabled),
        (":waf_rule_set", &host.waf_rule_set),
        (":rate_limit_enabled", &host.rate_limit_enabled),
        (":rate_limit_preset", &host.rate_limit_preset),
        (":rate_limit_custom", &host.rate_limit_custom),
        (":hsts_enabled", &host.hsts_enabled),
        (":hsts_max_age", &host.hsts_max_age),
        (":hsts_preload", &host.hsts_preload),
        (":csp_enabled", &host.csp_enabled),
        (":csp_directive", &host.csp_directive),
        (":x_frame_options", &host.x_frame_options),
        (":referrer_policy", &host.referrer_policy),
        (":mtls_enabled", &host.mtls_enabled),
        (":mtls_client_ca", &host.mtls_client_ca),
        (":crowdsec_enabled", &host.crowdsec_enabled),
        (":custom_caddy_config", &host.custom_caddy_config),
        (":enabled", &host.enabled),
    ]
}

fn host_from_row(row: &Row<'_>) -> rusqlite::Result<ProxyHost> {
    Ok(ProxyHost {
        id: row.get("id")?,
        domain_names: row.get("domain_names")?,
        scheme: row.get("scheme")?,
        forward_host: row.get("forward_host")?,
        forward_port: row.get("forward_port")?,
        ssl_enabled: row.get("ssl_enabled")?,
        ssl_forced: row.get("ssl_forced")?,
        https_port: row.get("https_port")?,
        dns_challenge: row.get("dns_challenge")?,
        dns_provider: row.get("dns_provider")?,
        dns_credentials: row.get("dns_credentials")?,
        basic_auth_enabled: row.get("basic_auth_enabled")?,
        basic_auth_username: row.get("basic_auth_username")?,
        basic_auth_password: row.get("basic_auth_password")?,
        forward_auth_enabled: row.get("forward_auth_enabled")?,
        forward_auth_url: row.get("forward_auth_url")?,
        forward_auth_type: row.get("forward_auth_type")?,
        ip_whitelist: row.get("ip_whitelist")?,
        ip_blacklist: row.get("ip_blacklist")?,
        geo_block_enabled: row.get("geo_block_enabled")?,
        geo_allowed_countries: row.get("geo_allowed_countries")?,
        local_only_enabled: row.get("local_only_enabled")?,
        waf_enabled: row.get("waf_enabled")?,
        waf_rule_set: row.get("waf_rule_set")?,
        rate_limit_enabled: row.get("rate_limit_enabled")?,
        rate_limit_preset: row.get("rate_limit_preset")?,
        rate_limit_custom: row.get("rate_limit_custom")?,
        hsts_enabled: row.get("hsts_enabled")?,
        hsts_max_age: row.get("hsts_max_age")?,
        hsts_preload: row.get("hsts_preload")?,
        csp_enabled: row.get("csp_enabled")?,
        csp_directive: row.get("csp_directive")?,
        x_frame_options: row.get("x_frame_options")?,
        referrer_policy: row.get("referrer_policy")?,
        mtls_enabled: row.get("mtls_enabled")?,
        mtls_client_ca: row.get("mtls_client_ca")?,
        crowdsec_enabled: row.get("crowdsec_enabled")?,
        custom_caddy_config: row.get("custom_caddy_config")?,
        enabled: row.get("enabled")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn server_from_row(row: &Row<'_>) -> rusqlite::Result<RemoteServer> {
    Ok(RemoteServer {
        id: row.get("id")?,
        uuid: row.get("uuid")?,
        name: row.get("name")?,
        provider: row.get("provider")?,
        host: row.get("host")?,
        port: row.get("port")?,
        username: row.get("username")?,
        enabled: row.get("enabled")?,
        reachable: row.get("reachable")?,
        last_checked: row.get("last_checked")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
