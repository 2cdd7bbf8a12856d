// In-process registry and token server used by the integration tests
#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ocicert::client::{ClientConfig, ClientProtocol};
use ocicert::Client;
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::{net::TcpListener, task::JoinHandle};

pub const TOKEN: &str = "abc";
pub const SERVICE: &str = "mock-registry";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn digest(data: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(data))
}

/// Test payloads made of random decimal digits
pub fn random_blob(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| b'0' + rng.gen_range(0..9u8)).collect()
}

pub fn http_client() -> Client {
    client_with_timeout(Duration::from_secs(5))
}

pub fn client_with_timeout(request_timeout: Duration) -> Client {
    Client::new(ClientConfig {
        protocol: ClientProtocol::Http,
        request_timeout,
        ..Default::default()
    })
}

/// How the mock registry treats authentication
#[derive(Clone, Debug)]
pub enum AuthMode {
    /// `/v2/` answers 200, no token needed
    Anonymous,
    /// Bearer challenge pointing at the built-in token endpoint
    Bearer {
        credentials: Option<(&'static str, &'static str)>,
    },
    /// Every request gets a 401 carrying this `WWW-Authenticate` value
    Challenge(String),
    /// Bearer challenge, but the token endpoint answers with this status
    TokenEndpointStatus(StatusCode),
    /// `/v2/` answers with this status
    ProbeStatus(StatusCode),
    /// `/v2/` sleeps before answering
    Stall(Duration),
}

#[derive(Clone, Debug)]
pub struct TokenRequest {
    pub query: HashMap<String, String>,
    pub authorization: Option<String>,
}

pub struct MockRegistry {
    mode: Mutex<AuthMode>,
    realm: String,
    blobs: Mutex<HashMap<(String, String), Bytes>>,
    manifests: Mutex<HashMap<(String, String), Bytes>>,
    uploads: Mutex<HashMap<String, (String, Vec<u8>)>>,
    authorizations: Mutex<Vec<Option<String>>>,
    token_requests: Mutex<Vec<TokenRequest>>,
}

impl MockRegistry {
    pub fn set_mode(&self, mode: AuthMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// `Authorization` headers of registry requests, in arrival order
    pub fn authorizations(&self) -> Vec<Option<String>> {
        self.authorizations.lock().unwrap().clone()
    }

    pub fn token_requests(&self) -> Vec<TokenRequest> {
        self.token_requests.lock().unwrap().clone()
    }

    fn challenge(&self) -> String {
        format!(r#"Bearer realm="{}",service="{}""#, self.realm, SERVICE)
    }

    fn unauthorized(&self, challenge: String) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert("WWW-Authenticate", challenge.parse().unwrap());
        (StatusCode::UNAUTHORIZED, headers, "unauthorized").into_response()
    }

    /// Checks authorization, returning the rejection to send if any
    async fn authorize(&self, headers: &HeaderMap, is_probe: bool) -> Option<Response> {
        let authorization = headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        self.authorizations.lock().unwrap().push(authorization.clone());

        let mode = self.mode.lock().unwrap().clone();
        match mode {
            AuthMode::Anonymous => None,
            AuthMode::Bearer { .. } => {
                if authorization.as_deref() == Some(format!("Bearer {}", TOKEN).as_str()) {
                    None
                } else {
                    Some(self.unauthorized(self.challenge()))
                }
            }
            AuthMode::TokenEndpointStatus(_) => Some(self.unauthorized(self.challenge())),
            AuthMode::Challenge(challenge) => Some(self.unauthorized(challenge)),
            AuthMode::ProbeStatus(status) if is_probe => Some(status.into_response()),
            AuthMode::ProbeStatus(_) => None,
            AuthMode::Stall(delay) => {
                tokio::time::sleep(delay).await;
                None
            }
        }
    }
}

async fn token_handler(
    State(state): State<Arc<MockRegistry>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let authorization = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    state.token_requests.lock().unwrap().push(TokenRequest {
        query,
        authorization: authorization.clone(),
    });

    let mode = state.mode.lock().unwrap().clone();
    match mode {
        AuthMode::TokenEndpointStatus(status) => (status, "denied").into_response(),
        AuthMode::Bearer {
            credentials: Some((username, password)),
        } => {
            let expected = format!(
                "Basic {}",
                STANDARD.encode(format!("{}:{}", username, password))
            );
            if authorization.as_deref() == Some(expected.as_str()) {
                token_body()
            } else {
                (StatusCode::UNAUTHORIZED, "bad credentials").into_response()
            }
        }
        _ => token_body(),
    }
}

fn token_body() -> Response {
    let body = serde_json::json!({ "token": TOKEN, "expires_in": 300 });
    (StatusCode::OK, body.to_string()).into_response()
}

async fn registry_handler(
    State(state): State<Arc<MockRegistry>>,
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path();
    let Some(rest) = path.strip_prefix("/v2/") else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if let Some(rejection) = state.authorize(&headers, rest.is_empty()).await {
        return rejection;
    }

    if rest.is_empty() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Docker-Distribution-API-Version",
            HeaderValue::from_static("registry/2.0"),
        );
        return (StatusCode::OK, headers, "{}").into_response();
    }
    if rest == "_catalog" {
        return catalog(&state);
    }
    if let Some(name) = rest.strip_suffix("/tags/list") {
        return tags(&state, name);
    }
    if let Some((name, uuid)) = rest.split_once("/blobs/uploads/") {
        return upload(&state, &method, name, uuid, query.get("digest"), body);
    }
    if let Some((name, digest)) = rest.split_once("/blobs/") {
        return blob(&state, &method, name, digest);
    }
    if let Some((name, reference)) = rest.split_once("/manifests/") {
        return manifest(&state, &method, name, reference, body);
    }
    StatusCode::NOT_FOUND.into_response()
}

fn catalog(state: &MockRegistry) -> Response {
    let repositories: BTreeSet<String> = state
        .manifests
        .lock()
        .unwrap()
        .keys()
        .chain(state.blobs.lock().unwrap().keys())
        .map(|(name, _)| name.clone())
        .collect();
    let body = serde_json::json!({ "repositories": repositories });
    (StatusCode::OK, body.to_string()).into_response()
}

fn tags(state: &MockRegistry, name: &str) -> Response {
    let tags: BTreeSet<String> = state
        .manifests
        .lock()
        .unwrap()
        .keys()
        .filter(|(repo, reference)| repo == name && !reference.starts_with("sha256:"))
        .map(|(_, reference)| reference.clone())
        .collect();
    if tags.is_empty() {
        return (StatusCode::NOT_FOUND, r#"{"errors":[{"code":"NAME_UNKNOWN"}]}"#).into_response();
    }
    let body = serde_json::json!({ "name": name, "tags": tags });
    (StatusCode::OK, body.to_string()).into_response()
}

fn upload(
    state: &MockRegistry,
    method: &Method,
    name: &str,
    uuid: &str,
    digest_param: Option<&String>,
    body: Bytes,
) -> Response {
    let mut uploads = state.uploads.lock().unwrap();
    match (method.clone(), uuid.is_empty()) {
        (Method::POST, true) => {
            let uuid = uuid::Uuid::new_v4().to_string();
            uploads.insert(uuid.clone(), (name.to_string(), Vec::new()));
            let mut headers = HeaderMap::new();
            headers.insert("Docker-Upload-UUID", uuid.parse().unwrap());
            headers.insert(
                "Location",
                format!("/v2/{}/blobs/uploads/{}", name, uuid).parse().unwrap(),
            );
            (StatusCode::ACCEPTED, headers).into_response()
        }
        (Method::PATCH, false) => match uploads.get_mut(uuid) {
            Some((_, data)) => {
                data.extend_from_slice(&body);
                let mut headers = HeaderMap::new();
                headers.insert(
                    "Location",
                    format!("/v2/{}/blobs/uploads/{}", name, uuid).parse().unwrap(),
                );
                headers.insert("Range", format!("0-{}", data.len().saturating_sub(1)).parse().unwrap());
                (StatusCode::ACCEPTED, headers).into_response()
            }
            None => StatusCode::NOT_FOUND.into_response(),
        },
        (Method::PUT, false) => {
            let Some((repo, mut data)) = uploads.remove(uuid) else {
                return StatusCode::NOT_FOUND.into_response();
            };
            data.extend_from_slice(&body);
            let actual = digest(&data);
            match digest_param {
                Some(expected) if *expected == actual => {
                    state
                        .blobs
                        .lock()
                        .unwrap()
                        .insert((repo, actual.clone()), Bytes::from(data));
                    let mut headers = HeaderMap::new();
                    headers.insert("Docker-Content-Digest", actual.parse().unwrap());
                    headers.insert(
                        "Location",
                        format!("/v2/{}/blobs/{}", name, actual).parse().unwrap(),
                    );
                    (StatusCode::CREATED, headers).into_response()
                }
                _ => (StatusCode::BAD_REQUEST, r#"{"errors":[{"code":"DIGEST_INVALID"}]}"#)
                    .into_response(),
            }
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

fn blob(state: &MockRegistry, method: &Method, name: &str, digest: &str) -> Response {
    let key = (name.to_string(), digest.to_string());
    let mut blobs = state.blobs.lock().unwrap();
    match *method {
        Method::GET | Method::HEAD => match blobs.get(&key) {
            Some(data) => {
                let mut headers = HeaderMap::new();
                headers.insert("Docker-Content-Digest", digest.parse().unwrap());
                (StatusCode::OK, headers, data.clone()).into_response()
            }
            None => StatusCode::NOT_FOUND.into_response(),
        },
        Method::DELETE => match blobs.remove(&key) {
            Some(_) => StatusCode::ACCEPTED.into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

fn manifest(
    state: &MockRegistry,
    method: &Method,
    name: &str,
    reference: &str,
    body: Bytes,
) -> Response {
    let mut manifests = state.manifests.lock().unwrap();
    match *method {
        Method::GET | Method::HEAD => {
            match manifests.get(&(name.to_string(), reference.to_string())) {
                Some(data) => {
                    let mut headers = HeaderMap::new();
                    headers.insert("Docker-Content-Digest", digest(data).parse().unwrap());
                    (StatusCode::OK, headers, data.clone()).into_response()
                }
                None => StatusCode::NOT_FOUND.into_response(),
            }
        }
        Method::PUT => {
            let manifest_digest = digest(&body);
            manifests.insert((name.to_string(), reference.to_string()), body.clone());
            manifests.insert((name.to_string(), manifest_digest.clone()), body);
            let mut headers = HeaderMap::new();
            headers.insert("Docker-Content-Digest", manifest_digest.parse().unwrap());
            (StatusCode::CREATED, headers).into_response()
        }
        Method::DELETE => {
            let Some(data) = manifests.remove(&(name.to_string(), reference.to_string())) else {
                return StatusCode::NOT_FOUND.into_response();
            };
            let manifest_digest = digest(&data);
            manifests.retain(|(repo, _), stored| !(repo == name && digest(stored) == manifest_digest));
            StatusCode::ACCEPTED.into_response()
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

pub struct TestRegistry {
    handle: JoinHandle<()>,
    pub server: String,
    pub state: Arc<MockRegistry>,
}

impl Drop for TestRegistry {
    fn drop(&mut self) {
        self.handle.abort()
    }
}

impl TestRegistry {
    pub async fn new(mode: AuthMode) -> Self {
        init_tracing();
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = format!("127.0.0.1:{}", port);

        let state = Arc::new(MockRegistry {
            mode: Mutex::new(mode),
            realm: format!("http://{}/token", server),
            blobs: Mutex::default(),
            manifests: Mutex::default(),
            uploads: Mutex::default(),
            authorizations: Mutex::default(),
            token_requests: Mutex::default(),
        });

        let app = Router::new()
            .route("/token", get(token_handler))
            .fallback(registry_handler)
            .with_state(state.clone());

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            handle,
            server,
            state,
        }
    }

    pub fn realm(&self) -> &str {
        &self.state.realm
    }
}
