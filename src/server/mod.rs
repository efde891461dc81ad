//! Inbound HTTP API: task registration and current-value queries, with a
//! uniform `{ code, message, result }` envelope on every response.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::catalog::CredentialType;
use crate::registry::Registry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
}

/// Response envelope shared by every endpoint. The HTTP status mirrors
/// `code`; on errors `message` carries the text and `result` stays empty.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub code: u16,
    pub message: String,
    pub result: Value,
}

impl Envelope {
    fn ok(result: Value) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            message: String::new(),
            result,
        }
    }

    fn err(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            message: message.into(),
            result: Value::Null,
        }
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterTask {
    #[serde(rename = "type")]
    pub typ: i64,
    /// Success-callback address; empty means no callback.
    #[serde(default)]
    pub notify: String,
    /// Dynamic-params supplier address; empty means no supplier.
    #[serde(default)]
    pub params: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub appid: String,
    pub appsecret: String,
    #[serde(default)]
    pub tasks: Vec<RegisterTask>,
}

pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/task/{appid}/{typ}", get(task_value))
        .with_state(AppState { registry })
}

pub async fn start(addr: SocketAddr, registry: Arc<Registry>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "installing ctrl-c handler failed");
        return;
    }
    info!("shutdown signal received");
}

/// Register (or update) a tenant and its tasks, then start their
/// schedulers. The first validation failure terminates the request; no
/// task is registered until the whole payload has been validated.
/// Registration never waits for a refresh to complete.
async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Envelope {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return Envelope::err(
                StatusCode::BAD_REQUEST,
                format!("invalid registration payload: {rejection}"),
            )
        }
    };

    if req.appid.is_empty() || req.appsecret.is_empty() {
        return Envelope::err(
            StatusCode::BAD_REQUEST,
            "appid and appsecret must not be empty",
        );
    }

    let mut validated = Vec::with_capacity(req.tasks.len());
    for entry in &req.tasks {
        match CredentialType::from_code(entry.typ) {
            Some(typ) => validated.push((typ, entry)),
            None => {
                return Envelope::err(
                    StatusCode::BAD_REQUEST,
                    format!("unsupported task type {}", entry.typ),
                )
            }
        }
    }

    let tenant = match state.registry.register_tenant(&req.appid, &req.appsecret).await {
        Ok(tenant) => tenant,
        Err(err) => return Envelope::err(StatusCode::BAD_REQUEST, err.to_string()),
    };

    for (typ, entry) in validated {
        tenant.register_task(typ, &entry.params, &entry.notify).await;
    }

    tenant.run_all().await;
    Envelope::ok(Value::Null)
}

/// Return the latest credential value for `(appid, type)`. An unregistered
/// pair, or a task that has never produced a value, is an error rather
/// than an empty default.
async fn task_value(
    State(state): State<AppState>,
    path: Result<Path<(String, i64)>, PathRejection>,
) -> Envelope {
    let Path((appid, typ)) = match path {
        Ok(path) => path,
        Err(rejection) => {
            return Envelope::err(
                StatusCode::BAD_REQUEST,
                format!("invalid task path: {rejection}"),
            )
        }
    };

    let typ = match CredentialType::from_code(typ) {
        Some(typ) => typ,
        None => {
            return Envelope::err(StatusCode::BAD_REQUEST, format!("unsupported task type {typ}"))
        }
    };

    let tenant = match state.registry.tenant(&appid).await {
        Some(tenant) => tenant,
        None => return Envelope::err(StatusCode::NOT_FOUND, "unknown appid"),
    };

    let task = match tenant.task(typ).await {
        Some(task) => task,
        None => {
            return Envelope::err(
                StatusCode::NOT_FOUND,
                format!("task type {} is not registered for this appid", typ.code()),
            )
        }
    };

    let value = task.value().await;
    if value.is_empty() {
        return Envelope::err(
            StatusCode::NOT_FOUND,
            format!("no value available yet for {}", typ.name()),
        );
    }

    Envelope::ok(Value::String(value))
}
