use axum::response::{IntoResponse, Response};

/// `GET /`: identify the server to probing clients.
pub async fn handle() -> Response {
    "This is attic, a content-addressed blob server.\n".into_response()
}
