//! Integration tests for Caddy Proxy Manager

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use caddy_proxy_manager::api::ApiServer;
use caddy_proxy_manager::auth::{AuthConfig, AuthManager};
use caddy_proxy_manager::caddy::CaddyClient;
use caddy_proxy_manager::db::Database;
use caddy_proxy_manager::error::ServiceError;
use caddy_proxy_manager::models::ProxyHost;
use caddy_proxy_manager::remote::RemoteServerService;
use caddy_proxy_manager::service::HostService;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

const ADMIN_TOKEN: &str = "test-admin-token";

/// Stand-in for the Caddy admin endpoint. Records every document POSTed to
/// `/load` and answers with a configurable status.
struct MockCaddy {
    addr: SocketAddr,
    loads: Arc<Mutex<Vec<Value>>>,
    status: Arc<AtomicU16>,
}

impl MockCaddy {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let loads = Arc::new(Mutex::new(Vec::new()));
        let status = Arc::new(AtomicU16::new(200));

        let loads_task = Arc::clone(&loads);
        let status_task = Arc::clone(&status);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let loads = Arc::clone(&loads_task);
                let status = status_task.load(Ordering::SeqCst);
                tokio::spawn(async move {
                    let _ = handle_mock_request(stream, loads, status).await;
                });
            }
        });

        Self { addr, loads, status }
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    fn load_count(&self) -> usize {
        self.loads.lock().len()
    }

    fn last_load(&self) -> Value {
        self.loads.lock().last().cloned().expect("no document pushed")
    }
}

async fn handle_mock_request(
    mut stream: TcpStream,
    loads: Arc<Mutex<Vec<Value>>>,
    status: u16,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let request_line = head.lines().next().unwrap_or_default().to_string();
    let body = if request_line.starts_with("POST /load") {
        let document: Value = serde_json::from_slice(&buf[header_end..]).unwrap_or(Value::Null);
        loads.lock().push(document);
        String::new()
    } else if request_line.starts_with("GET /config/") {
        loads
            .lock()
            .last()
            .cloned()
            .unwrap_or(Value::Null)
            .to_string()
    } else {
        String::new()
    };

    let response = format!(
        "HTTP/1.1 {} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

fn new_service(caddy: &MockCaddy) -> Arc<HostService> {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let client = Arc::new(CaddyClient::new(&caddy.url()).unwrap());
    Arc::new(HostService::new(db, client))
}

fn routes(document: &Value) -> Vec<Value> {
    document["apps"]["http"]["servers"]["srv0"]["routes"]
        .as_array()
        .cloned()
        .unwrap_or_default()
}

fn route_hosts(document: &Value) -> Vec<String> {
    routes(document)
        .iter()
        .map(|r| r["match"][0]["host"][0].as_str().unwrap_or_default().to_string())
        .collect()
}

// ==================== Service against mock Caddy ====================

#[tokio::test]
async fn test_create_pushes_route() {
    let caddy = MockCaddy::start().await;
    let service = new_service(&caddy);

    let host = service
        .create_host(ProxyHost::new("x.test", "10.0.0.5", 8080))
        .await
        .unwrap();
    assert!(host.id > 0);

    let document = caddy.last_load();
    assert_eq!(
        document["apps"]["http"]["servers"]["srv0"]["listen"],
        json!([":80", ":443"])
    );

    let routes = routes(&document);
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0]["match"], json!([{"host": ["x.test"]}]));
    assert!(routes[0].get("terminal").is_none());

    let handlers = routes[0]["handle"].as_array().unwrap();
    let last = handlers.last().unwrap();
    assert_eq!(last["handler"], "reverse_proxy");
    assert_eq!(last["upstreams"], json!([{"dial": "10.0.0.5:8080"}]));
}

#[tokio::test]
async fn test_toggle_removes_only_that_route() {
    let caddy = MockCaddy::start().await;
    let service = new_service(&caddy);

    let a = service.create_host(ProxyHost::new("a.test", "a", 80)).await.unwrap();
    service.create_host(ProxyHost::new("b.test", "b", 80)).await.unwrap();
    assert_eq!(route_hosts(&caddy.last_load()), vec!["a.test", "b.test"]);

    let toggled = service.toggle_host(a.id).await.unwrap();
    assert!(!toggled.enabled);
    assert_eq!(route_hosts(&caddy.last_load()), vec!["b.test"]);

    service.toggle_host(a.id).await.unwrap();
    assert_eq!(route_hosts(&caddy.last_load()), vec!["a.test", "b.test"]);
}

#[tokio::test]
async fn test_failed_push_keeps_store_change() {
    let caddy = MockCaddy::start().await;
    let service = new_service(&caddy);
    caddy.set_status(500);

    let result = service.create_host(ProxyHost::new("x.test", "backend", 80)).await;
    assert!(matches!(result, Err(ServiceError::Push(_))));
    assert_eq!(service.list_hosts().unwrap().len(), 1);
    assert_eq!(caddy.load_count(), 1);
}

#[tokio::test]
async fn test_failed_push_on_update_keeps_change() {
    let caddy = MockCaddy::start().await;
    let service = new_service(&caddy);
    let host = service.create_host(ProxyHost::new("x.test", "backend", 80)).await.unwrap();
    caddy.set_status(500);

    let result = service.update_host(host.id, json!({"forward_port": 9000})).await;
    assert!(matches!(result, Err(ServiceError::Push(_))));
    assert_eq!(service.get_host(host.id).unwrap().forward_port, 9000);
    assert_eq!(caddy.load_count(), 2);
}

#[tokio::test]
async fn test_failed_push_on_toggle_keeps_change() {
    let caddy = MockCaddy::start().await;
    let service = new_service(&caddy);
    let host = service.create_host(ProxyHost::new("x.test", "backend", 80)).await.unwrap();
    caddy.set_status(500);

    let result = service.toggle_host(host.id).await;
    assert!(matches!(result, Err(ServiceError::Push(_))));
    assert!(!service.get_host(host.id).unwrap().enabled);
    assert_eq!(caddy.load_count(), 2);
}

#[tokio::test]
async fn test_failed_push_on_delete_keeps_change() {
    let caddy = MockCaddy::start().await;
    let service = new_service(&caddy);
    let host = service.create_host(ProxyHost::new("x.test", "backend", 80)).await.unwrap();
    caddy.set_status(500);

    let result = service.delete_host(host.id).await;
    assert!(matches!(result, Err(ServiceError::Push(_))));
    assert!(matches!(service.get_host(host.id), Err(ServiceError::NotFound(_))));
    assert!(service.list_hosts().unwrap().is_empty());
    assert_eq!(caddy.load_count(), 2);
}

#[tokio::test]
async fn test_validation_failure_does_not_push() {
    let caddy = MockCaddy::start().await;
    let service = new_service(&caddy);

    let result = service.create_host(ProxyHost::new("x.test", "backend", 0)).await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));
    assert!(service.list_hosts().unwrap().is_empty());
    assert_eq!(caddy.load_count(), 0);
}

#[tokio::test]
async fn test_update_preserves_absent_fields() {
    let caddy = MockCaddy::start().await;
    let service = new_service(&caddy);

    let host = ProxyHost {
        waf_enabled: true,
        ip_whitelist: "10.0.0.0/8".to_string(),
        ..ProxyHost::new("x.test", "backend", 80)
    };
    let created = service.create_host(host).await.unwrap();

    let updated = service
        .update_host(created.id, json!({"forward_port": 9000, "ssl_enabled": true}))
        .await
        .unwrap();
    assert_eq!(updated.forward_port, 9000);
    assert!(updated.ssl_enabled);
    assert!(updated.waf_enabled);
    assert_eq!(updated.ip_whitelist, "10.0.0.0/8");

    let routes = routes(&caddy.last_load());
    assert_eq!(routes[0]["terminal"], json!(true));
    let handlers: Vec<&str> = routes[0]["handle"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["handler"].as_str().unwrap())
        .collect();
    assert_eq!(handlers, vec!["crowdsec", "acl", "coraza", "headers", "reverse_proxy"]);
}

#[tokio::test]
async fn test_delete_pushes_document_without_route() {
    let caddy = MockCaddy::start().await;
    let service = new_service(&caddy);

    let host = service.create_host(ProxyHost::new("x.test", "backend", 80)).await.unwrap();
    service.delete_host(host.id).await.unwrap();

    assert!(routes(&caddy.last_load()).is_empty());
    assert!(matches!(service.get_host(host.id), Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn test_live_config_reads_from_caddy() {
    let caddy = MockCaddy::start().await;
    let service = new_service(&caddy);

    service.create_host(ProxyHost::new("x.test", "backend", 80)).await.unwrap();
    let live = service.live_config().await.unwrap();
    assert_eq!(route_hosts(&live), vec!["x.test"]);
}

// ==================== Admin API ====================

struct TestApi {
    port: u16,
    shutdown_tx: watch::Sender<bool>,
}

async fn start_api(caddy: &MockCaddy) -> TestApi {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let client = Arc::new(CaddyClient::new(&caddy.url()).unwrap());
    let service = Arc::new(HostService::new(Arc::clone(&db), client));
    let servers = Arc::new(RemoteServerService::new(db));
    let auth = AuthManager::new(AuthConfig {
        secret: "integration-secret".to_string(),
        admin_token: ADMIN_TOKEN.to_string(),
        token_expiry_hours: 1,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let api = Arc::new(ApiServer::new(addr, service, servers, auth, shutdown_rx));
    tokio::spawn(async move {
        let _ = api.serve(listener).await;
    });

    TestApi {
        port: addr.port(),
        shutdown_tx,
    }
}

/// Send an HTTP request and return (status, parsed JSON body)
async fn http_request(
    port: u16,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<&str>,
) -> (u16, Value) {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).await.unwrap();

    let mut request = format!(
        "{} {} HTTP/1.1\r\nHost: 127.0.0.1:{}\r\nConnection: close\r\n",
        method, path, port
    );
    if let Some(token) = token {
        request.push_str(&format!("Authorization: Bearer {}\r\n", token));
    }
    let body = body.unwrap_or("");
    request.push_str(&format!(
        "Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    ));
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    let status = response
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let json = response
        .split_once("\r\n\r\n")
        .and_then(|(_, b)| serde_json::from_str(b).ok())
        .unwrap_or(Value::Null);

    (status, json)
}

async fn login(port: u16) -> String {
    let (status, body) = http_request(
        port,
        "POST",
        "/api/auth/login",
        None,
        Some(&json!({"token": ADMIN_TOKEN}).to_string()),
    )
    .await;
    assert_eq!(status, 200);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_api_health_needs_no_auth() {
    let caddy = MockCaddy::start().await;
    let api = start_api(&caddy).await;

    let (status, body) = http_request(api.port, "GET", "/health", None, None).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");

    let (status, body) = http_request(api.port, "GET", "/version", None, None).await;
    assert_eq!(status, 200);
    assert_eq!(body["name"], "caddy-proxy-manager");

    let _ = api.shutdown_tx.send(true);
}

#[tokio::test]
async fn test_api_requires_auth() {
    let caddy = MockCaddy::start().await;
    let api = start_api(&caddy).await;

    let (status, body) = http_request(api.port, "GET", "/api/proxy-hosts", None, None).await;
    assert_eq!(status, 401);
    assert_eq!(body["success"], false);

    let (status, _) =
        http_request(api.port, "GET", "/api/proxy-hosts", Some("not-a-token"), None).await;
    assert_eq!(status, 401);

    let (status, body) = http_request(
        api.port,
        "POST",
        "/api/auth/login",
        None,
        Some(r#"{"token":"wrong"}"#),
    )
    .await;
    assert_eq!(status, 401);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Invalid token");
    assert!(body.get("token").is_none());
}

#[tokio::test]
async fn test_api_host_lifecycle() {
    let caddy = MockCaddy::start().await;
    let api = start_api(&caddy).await;
    let jwt = login(api.port).await;
    let token = Some(jwt.as_str());

    // Create
    let (status, body) = http_request(
        api.port,
        "POST",
        "/api/proxy-hosts",
        token,
        Some(r#"{"domain_names":"app.test","forward_host":"10.0.0.5","forward_port":8080}"#),
    )
    .await;
    assert_eq!(status, 201);
    assert_eq!(body["success"], true);
    let id = body["data"]["id"].as_i64().unwrap();
    assert_eq!(body["data"]["crowdsec_enabled"], true);

    // List
    let (status, body) = http_request(api.port, "GET", "/api/proxy-hosts", token, None).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    // Update
    let (status, body) = http_request(
        api.port,
        "PUT",
        &format!("/api/proxy-hosts/{}", id),
        token,
        Some(r#"{"forward_port":9090}"#),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["forward_port"], 9090);
    assert_eq!(body["data"]["domain_names"], "app.test");

    // Toggle
    let (status, body) = http_request(
        api.port,
        "POST",
        &format!("/api/proxy-hosts/{}/toggle", id),
        token,
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["enabled"], false);
    assert!(routes(&caddy.last_load()).is_empty());

    // Preview reflects the store
    let (status, body) = http_request(api.port, "GET", "/api/caddy/preview", token, None).await;
    assert_eq!(status, 200);
    assert!(routes(&body["data"]).is_empty());

    // Delete
    let (status, body) = http_request(
        api.port,
        "DELETE",
        &format!("/api/proxy-hosts/{}", id),
        token,
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["message"], "Proxy host deleted");

    let (status, _) = http_request(
        api.port,
        "GET",
        &format!("/api/proxy-hosts/{}", id),
        token,
        None,
    )
    .await;
    assert_eq!(status, 404);

    let _ = api.shutdown_tx.send(true);
}

#[tokio::test]
async fn test_api_error_statuses() {
    let caddy = MockCaddy::start().await;
    let api = start_api(&caddy).await;
    let token = Some(ADMIN_TOKEN);

    let (status, _) = http_request(api.port, "GET", "/api/proxy-hosts/abc", token, None).await;
    assert_eq!(status, 400);

    let (status, _) =
        http_request(api.port, "POST", "/api/proxy-hosts", token, Some("{not json")).await;
    assert_eq!(status, 400);

    let (status, body) = http_request(
        api.port,
        "POST",
        "/api/proxy-hosts",
        token,
        Some(r#"{"domain_names":"","forward_host":"a","forward_port":80}"#),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "VALIDATION_FAILED");
    assert_eq!(caddy.load_count(), 0);

    caddy.set_status(500);
    let (status, body) = http_request(
        api.port,
        "POST",
        "/api/proxy-hosts",
        token,
        Some(r#"{"domain_names":"x.test","forward_host":"a","forward_port":80}"#),
    )
    .await;
    assert_eq!(status, 502);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Failed to reload Caddy:"));

    let (status, _) = http_request(api.port, "GET", "/api/unknown", token, None).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_api_remote_server_lifecycle() {
    let caddy = MockCaddy::start().await;
    let api = start_api(&caddy).await;
    let token = login(api.port).await;
    let token = Some(token.as_str());

    let (status, body) = http_request(
        api.port,
        "POST",
        "/api/remote-servers",
        token,
        Some(r#"{"name":"docker-1","host":"10.0.0.9","port":2375,"provider":"docker"}"#),
    )
    .await;
    assert_eq!(status, 201);
    let uuid = body["data"]["uuid"].as_str().unwrap().to_string();
    assert!(!uuid.is_empty());
    assert_eq!(body["data"]["enabled"], json!(true));

    let (status, _) = http_request(
        api.port,
        "POST",
        "/api/remote-servers",
        token,
        Some(r#"{"name":"spare","host":"10.0.0.10","enabled":false}"#),
    )
    .await;
    assert_eq!(status, 201);

    let (status, body) = http_request(api.port, "GET", "/api/remote-servers", token, None).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, body) =
        http_request(api.port, "GET", "/api/remote-servers?enabled=true", token, None).await;
    assert_eq!(status, 200);
    let enabled = body["data"].as_array().unwrap();
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0]["name"], "docker-1");

    let path = format!("/api/remote-servers/{}", uuid);
    let (status, body) = http_request(api.port, "GET", &path, token, None).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["host"], "10.0.0.9");

    let (status, body) =
        http_request(api.port, "PUT", &path, token, Some(r#"{"port":2376}"#)).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["port"], json!(2376));
    assert_eq!(body["data"]["name"], "docker-1");
    assert_eq!(body["data"]["uuid"], uuid.as_str());

    let (status, _) = http_request(api.port, "DELETE", &path, token, None).await;
    assert_eq!(status, 204);

    let (status, body) = http_request(api.port, "GET", &path, token, None).await;
    assert_eq!(status, 404);
    assert_eq!(body["code"], "NOT_FOUND");

    // Remote servers never enter the Caddy document
    assert_eq!(caddy.load_count(), 0);

    let _ = api.shutdown_tx.send(true);
}

#[tokio::test]
async fn test_api_remote_server_errors() {
    let caddy = MockCaddy::start().await;
    let api = start_api(&caddy).await;
    let token = Some(ADMIN_TOKEN);

    let (status, body) = http_request(
        api.port,
        "POST",
        "/api/remote-servers",
        token,
        Some(r#"{"name":"","host":"10.0.0.9"}"#),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "VALIDATION_FAILED");

    let (status, _) =
        http_request(api.port, "POST", "/api/remote-servers", token, Some("{not json")).await;
    assert_eq!(status, 400);

    let (status, _) =
        http_request(api.port, "GET", "/api/remote-servers/no-such-uuid", token, None).await;
    assert_eq!(status, 404);

    let (status, _) =
        http_request(api.port, "DELETE", "/api/remote-servers/no-such-uuid", token, None).await;
    assert_eq!(status, 404);

    let (status, _) = http_request(api.port, "GET", "/api/remote-servers", None, None).await;
    assert_eq!(status, 401);

    let _ = api.shutdown_tx.send(true);
}
