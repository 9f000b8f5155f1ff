//! Management API: a stateless HTTP layer over the repository.
//!
//! Every response uses the same envelope shape:
//! `{"success": bool, "payload"?: object, "error"?: {"message": string}}`.

use crate::db::{self, DbError, Pool};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

#[derive(Debug, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

type ApiResponse = (StatusCode, Json<Envelope>);

fn ok(status: StatusCode, payload: Option<Value>) -> ApiResponse {
    (
        status,
        Json(Envelope {
            success: true,
            payload,
            error: None,
        }),
    )
}

fn fail(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (
        status,
        Json(Envelope {
            success: false,
            payload: None,
            error: Some(ErrorBody {
                message: message.into(),
            }),
        }),
    )
}

/// Map repository errors onto the envelope. Entity errors translate 1:1 to
/// status codes; only connection-level failures become 500s.
fn fail_from(err: DbError) -> ApiResponse {
    let status = match &err {
        DbError::HandleNotFound(_) | DbError::WatcherNotFound(_) => StatusCode::NOT_FOUND,
        DbError::AlreadyWatching { .. } => StatusCode::CONFLICT,
        DbError::NoRelationship { .. } => StatusCode::NOT_FOUND,
        DbError::Unavailable(source) => {
            error!(?source, "storage unavailable");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    fail(status, err.to_string())
}

pub fn router(pool: Pool) -> Router {
    Router::new()
        .route("/handles", get(list_handles))
        .route("/handle/{name}", get(get_handle).post(create_handle))
        .route("/watcher/{chat_id}", get(get_watcher))
        .route("/watcher/{chat_id}/watch/{name}", post(watch_handle))
        .route("/watcher/{chat_id}/unwatch/{name}", delete(unwatch_handle))
        .with_state(pool)
}

async fn list_handles(State(pool): State<Pool>) -> ApiResponse {
    match db::fetch_all_handles(&pool).await {
        Ok(handles) => ok(StatusCode::OK, Some(json!({ "handles": handles }))),
        Err(err) => fail_from(err),
    }
}

async fn get_handle(State(pool): State<Pool>, Path(name): Path<String>) -> ApiResponse {
    match db::fetch_handle(&pool, &name).await {
        Ok(handle) => ok(StatusCode::OK, Some(json!(handle))),
        Err(err) => fail_from(err),
    }
}

async fn create_handle(State(pool): State<Pool>, Path(name): Path<String>) -> ApiResponse {
    match db::add_handle(&pool, &name).await {
        Ok(true) => ok(StatusCode::CREATED, Some(json!({ "handle": name }))),
        Ok(false) => fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            "there has been an issue creating the handle at this time",
        ),
        Err(err) => fail_from(err),
    }
}

async fn get_watcher(State(pool): State<Pool>, Path(chat_id): Path<String>) -> ApiResponse {
    match db::fetch_watcher(&pool, &chat_id).await {
        Ok(watcher) => ok(StatusCode::OK, Some(json!(watcher))),
        Err(err) => fail_from(err),
    }
}

async fn watch_handle(
    State(pool): State<Pool>,
    Path((chat_id, name)): Path<(String, String)>,
) -> ApiResponse {
    match db::create_watch_relationship(&pool, &name, &chat_id).await {
        Ok(()) => ok(StatusCode::CREATED, None),
        Err(err) => fail_from(err),
    }
}

async fn unwatch_handle(
    State(pool): State<Pool>,
    Path((chat_id, name)): Path<(String, String)>,
) -> ApiResponse {
    match db::delete_watch_relationship(&pool, &name, &chat_id).await {
        Ok(()) => ok(StatusCode::OK, None),
        Err(err) => fail_from(err),
    }
}
