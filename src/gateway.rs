//! Per-request dispatch.
//!
//! Every request enters [`dispatch`] through the router fallback:
//!
//! ```text
//! resolve path
//!   gateway path   -> static asset | login/info page (GET) | authenticate (POST)
//!   port present   -> session check -> port policy -> passthrough
//!   no port        -> recover port from Referer -> 307 to /<port><path> | 404
//! ```

use axum::extract::{FromRequest, Request, State};
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::{Form, Router};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::destination::{Destination, GATEWAY_PATH};
use crate::error::GatewayError;
use crate::proxy::{Passthrough, ProxyError};
use crate::session;
use crate::templates::{Templates, INFO_TEMPLATE, LOGIN_TEMPLATE};
use crate::token::TOKEN_LIFETIME_DAYS;

const STATIC_PREFIX: &str = "/_portgate/static";
const EXAMPLE_PORT: u16 = 8080;

#[derive(Clone)]
pub struct GatewayState {
    config: Arc<GatewayConfig>,
    passthrough: Arc<Passthrough>,
    templates: Arc<Templates>,
    static_files: ServeDir,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Result<Self, ProxyError> {
        let config = Arc::new(config);
        let passthrough = Passthrough::new(Arc::clone(&config))?;
        let static_files = ServeDir::new(&config.static_dir);

        Ok(Self {
            config,
            passthrough: Arc::new(passthrough),
            templates: Arc::new(Templates::load()),
            static_files,
        })
    }
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    #[serde(default)]
    key: Option<String>,
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn dispatch(
    State(state): State<GatewayState>,
    request: Request,
) -> Result<Response, GatewayError> {
    let destination = Destination::resolve(request.uri().path());

    if destination.is_gateway_path {
        return handle_gateway_request(&state, request, &destination).await;
    }

    if destination.port.is_none() {
        return redirect_from_referer(&request, &destination);
    }

    handle_passthrough_request(&state, request, &destination).await
}

/// Sends the browser to the routed URL it should have asked for, using the
/// port of the page that referred it here.
fn redirect_from_referer(
    request: &Request,
    destination: &Destination,
) -> Result<Response, GatewayError> {
    let referer = request
        .headers()
        .get(header::REFERER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let recovered = destination.recover_from_referer(referer).map_err(|error| {
        debug!(path = %destination.resource_path, %error, "unknown request");
        GatewayError::unknown_request()
    })?;

    let Some(mut location) = recovered.gateway_url() else {
        debug!(path = %destination.resource_path, referer, "unknown request");
        return Err(GatewayError::unknown_request());
    };
    if let Some(query) = request.uri().query() {
        location.push('?');
        location.push_str(query);
    }

    debug!(%location, "recovered destination from referer");
    Ok(Redirect::temporary(&location).into_response())
}

async fn handle_passthrough_request(
    state: &GatewayState,
    request: Request,
    destination: &Destination,
) -> Result<Response, GatewayError> {
    let jar = CookieJar::from_headers(request.headers());
    if !session::is_authenticated(&jar, &state.config.jwt_secret) {
        return Ok(Redirect::temporary(GATEWAY_PATH).into_response());
    }

    if let Some(port) = destination.port {
        if !state.config.port_allowed(port) {
            warn!(port, "rejected request to disallowed port");
            return Err(GatewayError::port_not_allowed());
        }
    }

    state
        .passthrough
        .forward(request, destination)
        .await
        .map_err(|error| {
            warn!(port = ?destination.port, %error, "upstream request failed");
            GatewayError::internal()
        })
}

async fn handle_gateway_request(
    state: &GatewayState,
    request: Request,
    destination: &Destination,
) -> Result<Response, GatewayError> {
    if let Some(asset_path) = static_asset_path(&destination.resource_path) {
        return serve_static_asset(state, request, asset_path).await;
    }

    match *request.method() {
        Method::GET | Method::HEAD => {
            let jar = CookieJar::from_headers(request.headers());
            render_gateway_page(state, &jar)
        }
        Method::POST => authenticate(state, request).await,
        _ => Err(GatewayError::method_not_allowed()),
    }
}

fn static_asset_path(resource_path: &str) -> Option<&str> {
    let rest = resource_path.strip_prefix(STATIC_PREFIX)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

async fn serve_static_asset(
    state: &GatewayState,
    request: Request,
    asset_path: &str,
) -> Result<Response, GatewayError> {
    let (mut parts, body) = request.into_parts();
    parts.uri = Uri::try_from(asset_path).map_err(|_| GatewayError::unknown_request())?;

    let served = state
        .static_files
        .clone()
        .oneshot(Request::from_parts(parts, body))
        .await;
    match served {
        Ok(response) => Ok(response.into_response()),
        Err(never) => match never {},
    }
}

fn render_gateway_page(state: &GatewayState, jar: &CookieJar) -> Result<Response, GatewayError> {
    let rendered = if session::is_authenticated(jar, &state.config.jwt_secret) {
        let example_port = state
            .config
            .allowed_ports
            .first()
            .copied()
            .unwrap_or(EXAMPLE_PORT)
            .to_string();
        let session_days = TOKEN_LIFETIME_DAYS.to_string();

        state.templates.render(
            INFO_TEMPLATE,
            &[
                ("target_host", state.config.target_host.as_str()),
                ("example_port", example_port.as_str()),
                ("session_days", session_days.as_str()),
            ],
        )
    } else {
        state.templates.render(LOGIN_TEMPLATE, &[])
    };

    rendered.map(|html| Html(html).into_response()).map_err(|error| {
        error!(%error, "failed to render gateway page");
        GatewayError::internal()
    })
}

async fn authenticate(state: &GatewayState, request: Request) -> Result<Response, GatewayError> {
    let jar = CookieJar::from_headers(request.headers());

    let provided = Form::<LoginForm>::from_request(request, &())
        .await
        .ok()
        .and_then(|Form(form)| form.key)
        .unwrap_or_default();

    if provided.is_empty() || !keys_match(&provided, &state.config.key) {
        warn!("rejected login with wrong key");
        return Err(GatewayError::wrong_key());
    }

    let jar = session::issue_session(jar, &state.config.jwt_secret).map_err(|error| {
        error!(%error, "failed to issue session");
        GatewayError::internal()
    })?;

    info!("issued session");
    Ok((StatusCode::FOUND, jar, [(header::LOCATION, GATEWAY_PATH)]).into_response())
}

fn keys_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}
