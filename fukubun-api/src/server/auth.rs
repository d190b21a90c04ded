use crate::server::{Result, ServerError};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, HeaderName, HeaderValue, header::SET_COOKIE, request::Parts},
};
use fukubun_common::model::{
    auth::{AuthToken, AuthTokenHash},
    user::User,
};
use fukubun_db::store::Store;
use headers::{Authorization, Cookie, HeaderMapExt, authorization::Bearer};
use std::sync::Arc;
use time::UtcDateTime;
use tracing::debug;

pub const SESSION_COOKIE: &str = "session";

/// Raw session token from the `session` cookie, or else a bearer header.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = headers.typed_get::<Cookie>()
        && let Some(token) = cookie.get(SESSION_COOKIE)
    {
        return Some(token.to_owned());
    }

    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|authorization| authorization.token().to_owned())
}

/// Parses and hashes the presented token. Malformed tokens resolve to `None`.
pub fn presented_token(headers: &HeaderMap) -> Result<Option<(AuthToken, AuthTokenHash)>> {
    let Some(token) = session_token(headers) else {
        return Ok(None);
    };
    let token: AuthToken = match token.parse() {
        Ok(token) => token,
        Err(err) => {
            debug!(%err, "Ignoring malformed session token");
            return Ok(None);
        }
    };
    let token_hash = token.hash()?;

    Ok(Some((token, token_hash)))
}

/// Resolves the request's session to the user it belongs to.
pub async fn current_user(headers: &HeaderMap, store: &dyn Store) -> Result<Option<User>> {
    let Some((token, token_hash)) = presented_token(headers)? else {
        return Ok(None);
    };

    let Some(authentication) = store.fetch_auth(&token_hash).await? else {
        return Ok(None);
    };
    if authentication.user != token.user_id
        || authentication.is_expired_at(UtcDateTime::now())
    {
        return Ok(None);
    }

    Ok(store.fetch_user(authentication.user).await?)
}

/// `Set-Cookie` value that stores `token` as the session.
pub fn session_cookie(token: &AuthToken) -> Result<(HeaderName, HeaderValue)> {
    let cookie = format!(
        "{SESSION_COOKIE}={}; HttpOnly; Path=/; SameSite=Lax",
        token.as_token_str()
    );
    Ok((SET_COOKIE, HeaderValue::try_from(cookie)?))
}

pub fn expired_session_cookie() -> (HeaderName, HeaderValue) {
    (
        SET_COOKIE,
        HeaderValue::from_static("session=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0"),
    )
}

/// Logged in user of a page route. Anonymous requests are sent to the login
/// page.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct AuthenticatedUser(pub User);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<dyn Store>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let store = Arc::<dyn Store>::from_ref(state);
        current_user(&parts.headers, &*store)
            .await?
            .map(Self)
            .ok_or(ServerError::LoginRequired)
    }
}

/// Logged in user of a JSON endpoint. Anonymous requests get a plain `401`.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct ApiUser(pub User);

impl<S> FromRequestParts<S> for ApiUser
where
    Arc<dyn Store>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let store = Arc::<dyn Store>::from_ref(state);
        current_user(&parts.headers, &*store)
            .await?
            .map(Self)
            .ok_or(ServerError::Unauthorized)
    }
}
