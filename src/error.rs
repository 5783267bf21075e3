use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

/// A request that ended in an error page. The message is all the client
/// sees, so it never carries upstream or internal detail.
#[derive(Debug)]
pub struct GatewayError {
    pub status: StatusCode,
    pub message: &'static str,
}

impl GatewayError {
    pub fn unknown_request() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: "Unknown request.",
        }
    }

    pub fn wrong_key() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "Wrong key.",
        }
    }

    pub fn port_not_allowed() -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: "Port not allowed.",
        }
    }

    pub fn method_not_allowed() -> Self {
        Self {
            status: StatusCode::METHOD_NOT_ALLOWED,
            message: "Method not allowed.",
        }
    }

    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "An error occurred.",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.message,
        )
            .into_response()
    }
}
