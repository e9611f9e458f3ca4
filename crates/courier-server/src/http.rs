//! Account and room endpoints.
//!
//! | Route          | Body                 | Success                            |
//! |----------------|----------------------|------------------------------------|
//! | `POST /signin` | `{"username"}`       | 202 `{"message":"User created"}`   |
//! | `POST /login`  | `{"id"}`             | 202 `{"id","name"}` + `uid` cookie |
//! | `POST /create` | `{"name"}`           | 200 `{"message":"done"}`           |
//! | `POST /join`   | `{"name","user"}`    | 200 `{"message":"room joined"}`    |
//!
//! Errors are `{"error": "..."}` with 400, 404, 409 or 500.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use courier_core::{IdentityStore, StoreError};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::server::AppState;

/// Lifetime of the login cookie, in seconds.
pub const LOGIN_COOKIE_MAX_AGE: u32 = 36_000;

/// Error response for the account endpoints.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or empty field, or unknown login.
    BadRequest(String),
    /// Unknown room or user.
    NotFound(String),
    /// Name already taken.
    Conflict(String),
    /// Store failure.
    Internal,
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(what) => Self::Conflict(format!("{what} already exists")),
            StoreError::NotFound(what) => Self::NotFound(format!("{what} not found")),
            other => {
                error!(error = %other, "store failure in http handler");
                Self::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m),
            Self::Conflict(m) => (StatusCode::CONFLICT, m),
            Self::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_owned()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn required(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{field} is required")));
    }
    Ok(())
}

/// `POST /signin` body.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SigninRequest {
    /// Desired username.
    pub username: String,
}

/// `POST /login` body. `id` carries the username.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    /// Username.
    pub id: String,
}

/// `POST /create` and `POST /join` body.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RoomRequest {
    /// Room name.
    pub name: String,
    /// Joining user (only for `/join`).
    pub user: String,
}

/// Account routes, merged into the main router.
pub fn routes() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/signin", post(signin))
        .route("/login", post(login))
        .route("/create", post(create_room))
        .route("/join", post(join_room))
}

async fn signin(
    State(state): State<AppState>,
    Json(req): Json<SigninRequest>,
) -> Result<impl IntoResponse, ApiError> {
    required(&req.username, "username")?;
    let user = state.store.register(&req.username).await?;
    info!(user = %user.username, "user created");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "User created" })),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let Some(user) = state.store.find_user(&req.id).await? else {
        return Err(ApiError::BadRequest("invalid user".to_owned()));
    };
    let cookie = format!(
        "uid={}; Max-Age={LOGIN_COOKIE_MAX_AGE}; Path=/; HttpOnly",
        user.id
    );
    Ok((
        StatusCode::ACCEPTED,
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "id": user.id, "name": user.username })),
    )
        .into_response())
}

async fn create_room(
    State(state): State<AppState>,
    Json(req): Json<RoomRequest>,
) -> Result<impl IntoResponse, ApiError> {
    required(&req.name, "name")?;
    let room = state.store.open_room(&req.name).await?;
    info!(room = %room.name, "room created");
    Ok((StatusCode::OK, Json(json!({ "message": "done" }))))
}

async fn join_room(
    State(state): State<AppState>,
    Json(req): Json<RoomRequest>,
) -> Result<impl IntoResponse, ApiError> {
    required(&req.name, "name")?;
    required(&req.user, "user")?;
    let added = state.store.add_member(&req.name, &req.user).await?;
    info!(room = %req.name, user = %req.user, added, "room joined");
    Ok((StatusCode::OK, Json(json!({ "message": "room joined" }))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::server::CourierServer;
    use axum::body::Body;
    use axum::http::Request;
    use courier_bus::LocalBus;
    use courier_store::SqliteStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn server() -> CourierServer {
        let store = Arc::new(SqliteStore::in_memory(Duration::from_secs(300)).unwrap());
        CourierServer::new(
            ServerConfig::default(),
            "A".into(),
            store,
            Arc::new(LocalBus::new()),
        )
    }

    async fn post_json(
        server: &CourierServer,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, axum::http::HeaderMap, serde_json::Value) {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        (status, headers, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn signin_creates_user_once() {
        let server = server();
        let (status, _, body) = post_json(&server, "/signin", json!({"username": "alice"})).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["message"], "User created");

        let (status, _, body) = post_json(&server, "/signin", json!({"username": "alice"})).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn signin_requires_username() {
        let server = server();
        let (status, _, body) = post_json(&server, "/signin", json!({"username": "  "})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "username is required");
    }

    #[tokio::test]
    async fn login_sets_cookie() {
        let server = server();
        let _ = post_json(&server, "/signin", json!({"username": "alice"})).await;

        let (status, headers, body) = post_json(&server, "/login", json!({"id": "alice"})).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["name"], "alice");
        let id = body["id"].as_str().unwrap();
        let cookie = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with(&format!("uid={id};")));
        assert!(cookie.contains("Max-Age=36000"));
        assert!(cookie.contains("HttpOnly"));
    }

    #[tokio::test]
    async fn login_unknown_user_is_bad_request() {
        let server = server();
        let (status, _, body) = post_json(&server, "/login", json!({"id": "ghost"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "invalid user"}));
    }

    #[tokio::test]
    async fn create_and_join_room() {
        let server = server();
        let _ = post_json(&server, "/signin", json!({"username": "bob"})).await;

        let (status, _, body) = post_json(&server, "/create", json!({"name": "team"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "done");

        let (status, _, _) = post_json(&server, "/create", json!({"name": "team"})).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _, body) =
            post_json(&server, "/join", json!({"name": "team", "user": "bob"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "room joined");

        let members = server.store().room_members("team").unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].as_str(), "bob");
    }

    #[tokio::test]
    async fn join_unknown_room_or_user_is_not_found() {
        let server = server();
        let _ = post_json(&server, "/signin", json!({"username": "bob"})).await;
        let _ = post_json(&server, "/create", json!({"name": "team"})).await;

        let (status, _, _) =
            post_json(&server, "/join", json!({"name": "nope", "user": "bob"})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) =
            post_json(&server, "/join", json!({"name": "team", "user": "ghost"})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
