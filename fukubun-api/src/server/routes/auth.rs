use crate::server::{
    Result, ServerError, ServerRouter, Settings,
    auth::{expired_session_cookie, presented_token, session_cookie},
    json::{Created, Done, Json},
    views::UserView,
};
use axum::{extract::State, response::IntoResponse};
use axum_extra::routing::{RouterExt, TypedPath};
use fukubun_common::model::{
    auth::{AuthToken, Authentication, PasswordDigest},
    user::{CreateUser, User, UserHandle},
};
use fukubun_db::store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::UtcDateTime;
use tracing::info;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(signup)
        .typed_post(login)
        .typed_post(logout)
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct SignupForm {
    handle: String,
    #[serde(default)]
    name: String,
    password: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct LoginForm {
    handle: String,
    password: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct SessionResponse {
    user: UserView,
    /// Same value as the `session` cookie, for bearer clients.
    token: String,
}

async fn start_session(store: &dyn Store, user: &User, settings: Settings) -> Result<AuthToken> {
    let token = AuthToken::generate_random(user.id);
    let authentication = Authentication {
        user: user.id,
        token_hash: token.hash()?,
        created_at: UtcDateTime::now(),
        expires_after: settings.session_ttl,
    };
    store.create_auth(&authentication).await?;

    Ok(token)
}

fn session_response(user: &User, token: &AuthToken) -> SessionResponse {
    SessionResponse {
        user: user.into(),
        token: token.as_token_str(),
    }
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/signup", rejection(ServerError))]
struct SignupPath();

async fn signup(
    SignupPath(): SignupPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    Json(form): Json<SignupForm>,
) -> Result<impl IntoResponse> {
    let handle = UserHandle::new(form.handle)?;
    let name = if form.name.trim().is_empty() {
        handle.get().to_owned()
    } else {
        form.name
    };
    let create = CreateUser {
        handle: handle.clone(),
        name,
        password: PasswordDigest::hash(&form.password)?,
    };

    let user = store
        .create_user(&create)
        .await?
        .ok_or(ServerError::HandleTaken(handle))?;
    info!(handle = %user.handle, "New user signed up");

    let token = start_session(&*store, &user, settings).await?;
    Ok((
        [session_cookie(&token)?],
        Created(session_response(&user, &token)),
    ))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/login", rejection(ServerError))]
struct LoginPath();

async fn login(
    LoginPath(): LoginPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    Json(form): Json<LoginForm>,
) -> Result<impl IntoResponse> {
    let credentials = match form.handle.parse::<UserHandle>() {
        Ok(handle) => store.fetch_credentials(&handle).await?,
        Err(_) => None,
    };
    let Some((user, digest)) = credentials else {
        PasswordDigest::verify_unknown_user(&form.password);
        return Err(ServerError::InvalidCredentials);
    };
    if !digest.verify(&form.password) {
        return Err(ServerError::InvalidCredentials);
    }

    let token = start_session(&*store, &user, settings).await?;
    Ok((
        [session_cookie(&token)?],
        Json(session_response(&user, &token)),
    ))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/logout", rejection(ServerError))]
struct LogoutPath();

async fn logout(
    LogoutPath(): LogoutPath,
    State(store): State<Arc<dyn Store>>,
    headers: axum::http::HeaderMap,
) -> Result<impl IntoResponse> {
    if let Some((_, token_hash)) = presented_token(&headers)? {
        store.delete_auth(&token_hash).await?;
    }

    Ok(([expired_session_cookie()], Done::OK))
}
