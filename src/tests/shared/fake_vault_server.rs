//! Serves a [MockVaultBackend] over the Vault HTTP API so the real
//! [crate::application::vault_client::HttpVaultAdmin] can be tested end to
//! end.

use std::collections::BTreeMap;

use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use serde_json::Value;
use tokio::net::TcpListener;

use super::mock_vault::MockSealStatus;
use super::mock_vault::MockVaultBackend;
use crate::application::vault_client::VaultError;

struct FakeVaultError(VaultError);

impl IntoResponse for FakeVaultError {
    fn into_response(self) -> Response {
        let (status, message) = match self.0 {
            VaultError::Unreachable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            VaultError::Unauthenticated => (StatusCode::FORBIDDEN, "permission denied".to_string()),
            VaultError::PathNotFound => (StatusCode::NOT_FOUND, String::new()),
            VaultError::InvalidRequest(m) => (StatusCode::BAD_REQUEST, m),
            VaultError::AlreadyInitialized => (
                StatusCode::BAD_REQUEST,
                "Vault is already initialized".to_string(),
            ),
        };
        let errors: Vec<String> = if message.is_empty() { vec![] } else { vec![message] };
        (status, Json(json!({ "errors": errors }))).into_response()
    }
}

impl From<VaultError> for FakeVaultError {
    fn from(e: VaultError) -> Self {
        Self(e)
    }
}

type FakeResult = Result<Json<Value>, FakeVaultError>;

fn token(headers: &HeaderMap) -> Option<&str> {
    headers.get("x-vault-token").and_then(|v| v.to_str().ok())
}

fn seal_status_json(status: MockSealStatus) -> Json<Value> {
    Json(json!({
        "sealed": status.sealed,
        "t": status.threshold,
        "n": 1,
        "progress": status.progress,
    }))
}

fn mount_table(paths: Vec<String>) -> Json<Value> {
    let table: serde_json::Map<String, Value> = paths
        .into_iter()
        .map(|p| (p, json!({ "type": "kv" })))
        .collect();
    Json(json!({ "data": table }))
}

async fn init_status(State(backend): State<MockVaultBackend>) -> FakeResult {
    Ok(Json(json!({ "initialized": backend.sys_init_status()? })))
}

async fn init(State(backend): State<MockVaultBackend>) -> FakeResult {
    let credentials = backend.sys_init()?;
    Ok(Json(json!({
        "keys": credentials.unseal_keys,
        "keys_base64": credentials.unseal_keys,
        "root_token": credentials.root_token,
    })))
}

async fn seal_status(State(backend): State<MockVaultBackend>) -> FakeResult {
    Ok(seal_status_json(backend.sys_seal_status()?))
}

#[derive(Deserialize)]
struct UnsealBody {
    key: String,
}

async fn unseal(State(backend): State<MockVaultBackend>, Json(body): Json<UnsealBody>) -> FakeResult {
    Ok(seal_status_json(backend.sys_unseal(&body.key)?))
}

async fn lookup_self(State(backend): State<MockVaultBackend>, headers: HeaderMap) -> FakeResult {
    backend.lookup_self(token(&headers))?;
    Ok(Json(json!({ "data": { "policies": ["root"] } })))
}

async fn list_mounts(State(backend): State<MockVaultBackend>, headers: HeaderMap) -> FakeResult {
    Ok(mount_table(backend.mounts(token(&headers))?))
}

async fn create_mount(
    State(backend): State<MockVaultBackend>,
    headers: HeaderMap,
    Path(mount): Path<String>,
) -> FakeResult {
    backend.mount_kv(token(&headers), &mount)?;
    Ok(Json(json!({})))
}

async fn list_auth(State(backend): State<MockVaultBackend>, headers: HeaderMap) -> FakeResult {
    Ok(mount_table(backend.enabled_auth_methods(token(&headers))?))
}

async fn enable_auth(
    State(backend): State<MockVaultBackend>,
    headers: HeaderMap,
    Path(method): Path<String>,
) -> FakeResult {
    backend.enable_auth(token(&headers), &method)?;
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
struct PolicyBody {
    policy: String,
}

async fn put_policy(
    State(backend): State<MockVaultBackend>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(body): Json<PolicyBody>,
) -> FakeResult {
    backend.put_policy(token(&headers), &name, &body.policy)?;
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
struct UserBody {
    token_policies: String,
}

async fn put_user(
    State(backend): State<MockVaultBackend>,
    headers: HeaderMap,
    Path(username): Path<String>,
    Json(body): Json<UserBody>,
) -> FakeResult {
    backend.put_user(token(&headers), &username, &body.token_policies)?;
    Ok(Json(json!({})))
}

async fn read_secret(
    State(backend): State<MockVaultBackend>,
    headers: HeaderMap,
    Path((mount, path)): Path<(String, String)>,
) -> FakeResult {
    let fields = backend.read(token(&headers), &mount, &path)?;
    Ok(Json(json!({ "data": { "data": fields, "metadata": { "version": 1 } } })))
}

#[derive(Deserialize)]
struct WriteBody {
    data: BTreeMap<String, String>,
}

async fn write_secret(
    State(backend): State<MockVaultBackend>,
    headers: HeaderMap,
    Path((mount, path)): Path<(String, String)>,
    Json(body): Json<WriteBody>,
) -> FakeResult {
    backend.write(token(&headers), &mount, &path, body.data)?;
    Ok(Json(json!({ "data": { "version": 1 } })))
}

pub fn fake_vault_router(backend: MockVaultBackend) -> Router {
    Router::new()
        .route("/v1/sys/init", get(init_status).put(init))
        .route("/v1/sys/seal-status", get(seal_status))
        .route("/v1/sys/unseal", put(unseal))
        .route("/v1/auth/token/lookup-self", get(lookup_self))
        .route("/v1/sys/mounts", get(list_mounts))
        .route("/v1/sys/mounts/{mount}", post(create_mount))
        .route("/v1/sys/auth", get(list_auth))
        .route("/v1/sys/auth/{method}", post(enable_auth))
        .route("/v1/sys/policies/acl/{name}", put(put_policy))
        .route("/v1/auth/userpass/users/{username}", post(put_user))
        .route(
            "/v1/{mount}/data/{*path}",
            get(read_secret).post(write_secret),
        )
        .with_state(backend)
}

/// serve `backend` on an ephemeral local port and return its base url
pub async fn spawn_fake_vault(backend: MockVaultBackend) -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        let _ = axum::serve(listener, fake_vault_router(backend)).await;
    });

    Ok(format!("http://{addr}"))
}

/// a url on which nothing listens
pub async fn unused_local_url() -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{addr}"))
}
