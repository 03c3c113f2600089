//! Admin API server
//!
//! JSON endpoints for managing proxy hosts and remote servers and for
//! inspecting the Caddy configuration. Every response uses the
//! `{success, data, error}` envelope.

use crate::auth::{AuthManager, LoginRequest, LoginResponse};
use crate::error::{json_error_response, ApiErrorCode};
use crate::models::{ProxyHost, RemoteServer};
use crate::remote::RemoteServerService;
use crate::service::HostService;
use anyhow::Result;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const HOSTS_PATH: &str = "/api/proxy-hosts";
const SERVERS_PATH: &str = "/api/remote-servers";

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct MessageBody {
    message: &'static str,
}

/// Admin API server
pub struct ApiServer {
    bind_addr: SocketAddr,
    service: Arc<HostService>,
    servers: Arc<RemoteServerService>,
    auth: AuthManager,
    shutdown_rx: watch::Receiver<bool>,
}

impl ApiServer {
    pub fn new(
        bind_addr: SocketAddr,
        service: Arc<HostService>,
        servers: Arc<RemoteServerService>,
        auth: AuthManager,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            service,
            servers,
            auth,
            shutdown_rx,
        }
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, "Admin API listening");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let api = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(e) = api.serve_connection(stream).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Admin API shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    async fn serve_connection(self: Arc<Self>, stream: TcpStream) -> Result<()> {
        let io = TokioIo::new(stream);
        let service = service_fn(move |req| {
            let api = Arc::clone(&self);
            async move { api.handle_request(req).await }
        });

        AutoBuilder::new(TokioExecutor::new())
            .serve_connection(io, service)
            .await
            .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

        Ok(())
    }

    fn check_auth(&self, req: &Request<hyper::body::Incoming>) -> bool {
        let header = req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        self.auth.is_authorized(header)
    }

    async fn handle_request(
        self: Arc<Self>,
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let path = req.uri().path().to_string();
        let query = req.uri().query().unwrap_or_default().to_string();
        let method = req.method().clone();

        debug!(%method, %path, "API request");

        // Health check - no auth required
        if path == "/health" && method == Method::GET {
            return Ok(json_response(StatusCode::OK, r#"{"status":"ok"}"#));
        }

        // Version - no auth required
        if path == "/version" && method == Method::GET {
            let version = serde_json::json!({
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            });
            return Ok(json_response(StatusCode::OK, version.to_string()));
        }

        if path == "/api/auth/login" && method == Method::POST {
            return Ok(self.login(req).await.unwrap_or_else(internal_error));
        }

        // Auth required for all other endpoints
        if !self.check_auth(&req) {
            warn!(%path, "Unauthorized API request");
            return Ok(json_error_response(ApiErrorCode::Unauthorized, "Unauthorized"));
        }

        let response = match (method, path.as_str()) {
            (Method::GET, HOSTS_PATH) => self.list_hosts(),
            (Method::POST, HOSTS_PATH) => self.create_host(req).await,

            (method, path) if path.starts_with("/api/proxy-hosts/") => {
                let rest = &path[HOSTS_PATH.len() + 1..];
                let (id, action) = match rest.split_once('/') {
                    Some((id, action)) => (id, Some(action)),
                    None => (rest, None),
                };

                match id.parse::<i64>() {
                    Err(_) => Ok(json_error_response(
                        ApiErrorCode::BadRequest,
                        format!("Invalid proxy host id: {}", id),
                    )),
                    Ok(id) => match (method, action) {
                        (Method::GET, None) => self.get_host(id),
                        (Method::PUT, None) => self.update_host(id, req).await,
                        (Method::DELETE, None) => self.delete_host(id).await,
                        (Method::POST, Some("toggle")) => self.toggle_host(id).await,
                        _ => Ok(not_found()),
                    },
                }
            }

            (Method::GET, SERVERS_PATH) => self.list_servers(&query),
            (Method::POST, SERVERS_PATH) => self.create_server(req).await,
            (method, path) if path.starts_with("/api/remote-servers/") => {
                let uuid = &path[SERVERS_PATH.len() + 1..];
                match method {
                    _ if uuid.is_empty() || uuid.contains('/') => Ok(not_found()),
                    Method::GET => self.get_server(uuid),
                    Method::PUT => self.update_server(uuid, req).await,
                    Method::DELETE => self.delete_server(uuid),
                    _ => Ok(not_found()),
                }
            }

            (Method::GET, "/api/caddy/config") => self.live_config().await,
            (Method::GET, "/api/caddy/preview") => self.preview_config(),

            _ => Ok(not_found()),
        };

        Ok(response.unwrap_or_else(internal_error))
    }

    // ==================== Auth ====================

    async fn login(&self, req: Request<hyper::body::Incoming>) -> Result<Response<Full<Bytes>>> {
        let body = req.collect().await?.to_bytes();
        let login: LoginRequest = match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => {
                return Ok(json_error_response(
                    ApiErrorCode::BadRequest,
                    format!("Invalid JSON: {}", e),
                ));
            }
        };

        match self.auth.login(&login) {
            Some(token) => {
                info!("Admin login succeeded");
                let response = LoginResponse {
                    success: true,
                    token: Some(token?),
                    error: None,
                };
                Ok(json_response(StatusCode::OK, serde_json::to_string(&response)?))
            }
            None => {
                warn!("Admin login rejected");
                let response = LoginResponse {
                    success: false,
                    token: None,
                    error: Some("Invalid token".to_string()),
                };
                Ok(json_response(StatusCode::UNAUTHORIZED, serde_json::to_string(&response)?))
            }
        }
    }

    // ==================== Proxy Hosts ====================

    fn list_hosts(&self) -> Result<Response<Full<Bytes>>> {
        match self.service.list_hosts() {
            Ok(hosts) => ok_json(StatusCode::OK, hosts),
            Err(e) => Ok(e.to_response()),
        }
    }

    fn get_host(&self, id: i64) -> Result<Response<Full<Bytes>>> {
        match self.service.get_host(id) {
            Ok(host) => ok_json(StatusCode::OK, host),
            Err(e) => Ok(e.to_response()),
        }
    }

    async fn create_host(&self, req: Request<hyper::body::Incoming>) -> Result<Response<Full<Bytes>>> {
        let body = req.collect().await?.to_bytes();
        let host: ProxyHost = match serde_json::from_slice(&body) {
            Ok(h) => h,
            Err(e) => {
                return Ok(json_error_response(
                    ApiErrorCode::BadRequest,
                    format!("Invalid JSON: {}", e),
                ));
            }
        };

        match self.service.create_host(host).await {
            Ok(created) => ok_json(StatusCode::CREATED, created),
            Err(e) => {
                warn!(error = %e, "Failed to create proxy host");
                Ok(e.to_response())
            }
        }
    }

    async fn update_host(
        &self,
        id: i64,
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Full<Bytes>>> {
        let body = req.collect().await?.to_bytes();
        let patch: serde_json::Value = match serde_json::from_slice(&body) {
            Ok(p) => p,
            Err(e) => {
                return Ok(json_error_response(
                    ApiErrorCode::BadRequest,
                    format!("Invalid JSON: {}", e),
                ));
            }
        };

        match self.service.update_host(id, patch).await {
            Ok(updated) => ok_json(StatusCode::OK, updated),
            Err(e) => {
                warn!(id, error = %e, "Failed to update proxy host");
                Ok(e.to_response())
            }
        }
    }

    async fn delete_host(&self, id: i64) -> Result<Response<Full<Bytes>>> {
        match self.service.delete_host(id).await {
            Ok(()) => ok_json(
                StatusCode::OK,
                MessageBody {
                    message: "Proxy host deleted",
                },
            ),
            Err(e) => {
                warn!(id, error = %e, "Failed to delete proxy host");
                Ok(e.to_response())
            }
        }
    }

    async fn toggle_host(&self, id: i64) -> Result<Response<Full<Bytes>>> {
        match self.service.toggle_host(id).await {
            Ok(host) => ok_json(StatusCode::OK, host),
            Err(e) => {
                warn!(id, error = %e, "Failed to toggle proxy host");
                Ok(e.to_response())
            }
        }
    }

    // ==================== Remote Servers ====================

    fn list_servers(&self, query: &str) -> Result<Response<Full<Bytes>>> {
        let enabled_only = query.split('&').any(|pair| pair == "enabled=true");
        match self.servers.list(enabled_only) {
            Ok(servers) => ok_json(StatusCode::OK, servers),
            Err(e) => Ok(e.to_response()),
        }
    }

    fn get_server(&self, uuid: &str) -> Result<Response<Full<Bytes>>> {
        match self.servers.get(uuid) {
            Ok(server) => ok_json(StatusCode::OK, server),
            Err(e) => Ok(e.to_response()),
        }
    }

    async fn create_server(&self, req: Request<hyper::body::Incoming>) -> Result<Response<Full<Bytes>>> {
        let body = req.collect().await?.to_bytes();
        let server: RemoteServer = match serde_json::from_slice(&body) {
            Ok(s) => s,
            Err(e) => {
                return Ok(json_error_response(
                    ApiErrorCode::BadRequest,
                    format!("Invalid JSON: {}", e),
                ));
            }
        };

        match self.servers.create(server) {
            Ok(created) => ok_json(StatusCode::CREATED, created),
            Err(e) => {
                warn!(error = %e, "Failed to create remote server");
                Ok(e.to_response())
            }
        }
    }

    async fn update_server(
        &self,
        uuid: &str,
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Full<Bytes>>> {
        let body = req.collect().await?.to_bytes();
        let patch: serde_json::Value = match serde_json::from_slice(&body) {
            Ok(p) => p,
            Err(e) => {
                return Ok(json_error_response(
                    ApiErrorCode::BadRequest,
                    format!("Invalid JSON: {}", e),
                ));
            }
        };

        match self.servers.update(uuid, patch) {
            Ok(updated) => ok_json(StatusCode::OK, updated),
            Err(e) => {
                warn!(uuid, error = %e, "Failed to update remote server");
                Ok(e.to_response())
            }
        }
    }

    fn delete_server(&self, uuid: &str) -> Result<Response<Full<Bytes>>> {
        match self.servers.delete(uuid) {
            Ok(()) => Ok(Response::builder()
                .status(StatusCode::NO_CONTENT)
                .body(Full::new(Bytes::new()))
                .expect("valid response")),
            Err(e) => Ok(e.to_response()),
        }
    }

    // ==================== Caddy ====================

    async fn live_config(&self) -> Result<Response<Full<Bytes>>> {
        match self.service.live_config().await {
            Ok(config) => ok_json(StatusCode::OK, config),
            Err(e) => Ok(e.to_response()),
        }
    }

    fn preview_config(&self) -> Result<Response<Full<Bytes>>> {
        match self.service.preview_document() {
            Ok(document) => ok_json(StatusCode::OK, document),
            Err(e) => Ok(e.to_response()),
        }
    }
}

fn ok_json<T: Serialize>(status: StatusCode, data: T) -> Result<Response<Full<Bytes>>> {
    let response = ApiResponse::ok(data);
    Ok(json_response(status, serde_json::to_string(&response)?))
}

fn not_found() -> Response<Full<Bytes>> {
    json_error_response(ApiErrorCode::NotFound, "Not found")
}

fn internal_error(e: anyhow::Error) -> Response<Full<Bytes>> {
    error!(error = %e, "API error");
    json_error_response(ApiErrorCode::InternalError, format!("Internal error: {}", e))
}

fn json_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(body.into()))
        .expect("valid response")
}
