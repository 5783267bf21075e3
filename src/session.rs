use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use thiserror::Error;
use time::OffsetDateTime;

use crate::token::{self, TokenError};

pub const SESSION_COOKIE: &str = "_portgate_token";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("cookie expiry out of range: {0}")]
    Expiry(#[from] time::error::ComponentRange),
}

/// A missing cookie is not an error, only an unauthenticated request.
pub fn is_authenticated(jar: &CookieJar, jwt_secret: &str) -> bool {
    jar.get(SESSION_COOKIE)
        .is_some_and(|cookie| token::verify(cookie.value(), jwt_secret))
}

pub fn issue_session(jar: CookieJar, jwt_secret: &str) -> Result<CookieJar, SessionError> {
    issue_session_at(jar, jwt_secret, Utc::now())
}

fn issue_session_at(
    jar: CookieJar,
    jwt_secret: &str,
    now: DateTime<Utc>,
) -> Result<CookieJar, SessionError> {
    let value = token::issue_at(jwt_secret, now)?;
    let expires = OffsetDateTime::from_unix_timestamp(token::expiration_from(now).timestamp())?;

    let mut cookie = Cookie::new(SESSION_COOKIE, value);
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Strict);
    cookie.set_path("/");
    cookie.set_expires(expires);

    Ok(jar.add(cookie))
}
