//! JSON control surface for the presentation layer.
//!
//! The setup and unseal pages read the lifecycle status and maintenance locks
//! from here and submit passphrases. Nothing here exposes secrets.

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::header;
use axum::http::HeaderValue;
use axum::http::Method;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::AllowOrigin;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::*;

use crate::application::loops::vault_loop::InitError;
use crate::application::loops::vault_loop::UnsealError;
use crate::application::loops::vault_loop::VaultCoordinator;
use crate::application::maintenance::MaintenanceLock;
use crate::application::maintenance::MaintenanceLocks;
use crate::application::vault_client::VaultError;
use crate::state::vault::encryption::Passphrase;
use crate::state::vault::lifecycle::LifecycleSnapshot;

/// An error answer: status code plus a message safe to show an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ErrorBody {
    error: String,
}

impl RestError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<InitError> for RestError {
    fn from(err: InitError) -> Self {
        match err {
            InitError::NotAwaitingInit(_) | InitError::InFlight | InitError::AlreadyInitialized => {
                Self::new(StatusCode::CONFLICT, err.to_string())
            }
            InitError::EmptyPassphrase => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
            _ => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "initialization failed, see the server log",
            ),
        }
    }
}

impl From<UnsealError> for RestError {
    fn from(err: UnsealError) -> Self {
        match err {
            UnsealError::InvalidKey => Self::new(StatusCode::UNAUTHORIZED, err.to_string()),
            UnsealError::NotAwaitingUnseal(_) | UnsealError::EnvelopeMissing => {
                Self::new(StatusCode::CONFLICT, err.to_string())
            }
            UnsealError::Backend(VaultError::Unreachable(_)) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "secret backend unavailable",
            ),
            _ => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "unseal failed, see the server log",
            ),
        }
    }
}

/// shared by all handlers
#[derive(Debug, Clone)]
pub struct RestState {
    pub coordinator: VaultCoordinator,
    pub maintenance: MaintenanceLocks,
}

#[derive(Debug, Clone, Serialize)]
pub struct VaultStatus {
    #[serde(flatten)]
    pub lifecycle: LifecycleSnapshot,
    pub maintenance: Vec<MaintenanceLock>,
}

/// body of the init and unseal requests
#[derive(Deserialize)]
pub struct PassphraseRequest {
    passphrase: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    pub state: String,
}

/// The read-only routes answer any origin. Passphrase routes only answer
/// cross-origin requests from `passphrase_origins`.
pub fn router(state: RestState, passphrase_origins: Vec<HeaderValue>) -> axum::Router {
    let read_only: axum::Router<RestState> = axum::Router::new()
        .route("/vault/status", axum::routing::get(vault_status))
        .route("/maintenance", axum::routing::get(maintenance_locks))
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([Method::GET]),
        );

    let passphrase: axum::Router<RestState> = axum::Router::new()
        .route("/vault/init", axum::routing::post(vault_init))
        .route("/vault/unseal", axum::routing::post(vault_unseal))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(passphrase_origins))
                .allow_methods([Method::POST])
                .allow_headers([header::CONTENT_TYPE]),
        );

    read_only
        .merge(passphrase)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub(crate) async fn run_rest_server(
    rest_listener: TcpListener,
    state: RestState,
    passphrase_origins: Vec<HeaderValue>,
) -> Result<(), anyhow::Error> {
    if let Ok(addr) = rest_listener.local_addr() {
        info!("control surface listening on http://{addr}");
    }
    if passphrase_origins.is_empty() {
        debug!("no cross-origin passphrase submissions allowed");
    }

    axum::serve(
        rest_listener,
        router(state, passphrase_origins).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn vault_status(State(state): State<RestState>) -> Json<VaultStatus> {
    Json(VaultStatus {
        lifecycle: state.coordinator.snapshot().await,
        maintenance: state.maintenance.snapshot().await,
    })
}

async fn vault_init(
    State(state): State<RestState>,
    Json(request): Json<PassphraseRequest>,
) -> Result<Json<Accepted>, RestError> {
    state
        .coordinator
        .request_init(Passphrase::from(request.passphrase))
        .await?;

    Ok(Json(Accepted {
        state: state.coordinator.connection_state().await.to_string(),
    }))
}

async fn vault_unseal(
    State(state): State<RestState>,
    Json(request): Json<PassphraseRequest>,
) -> Result<Json<Accepted>, RestError> {
    state
        .coordinator
        .request_unseal(Passphrase::from(request.passphrase))
        .await?;

    Ok(Json(Accepted {
        state: state.coordinator.connection_state().await.to_string(),
    }))
}

async fn maintenance_locks(State(state): State<RestState>) -> Json<Vec<MaintenanceLock>> {
    Json(state.maintenance.snapshot().await)
}
