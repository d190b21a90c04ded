use crate::server::{
    Result, ServerError, ServerRouter, Settings,
    auth::AuthenticatedUser,
    json::Json,
    views::{ProfileView, ViewContext},
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use fukubun_common::model::user::{FollowCounts, ProfileUpdate, User, UserHandle};
use fukubun_db::store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(get_own_profile)
        .typed_post(edit_profile)
        .typed_get(get_profile)
        .typed_post(follow)
        .typed_post(unfollow)
}

async fn profile_view(
    store: &dyn Store,
    user: &User,
    is_following: Option<bool>,
    context: &ViewContext,
) -> Result<ProfileView> {
    let follow_counts = store.fetch_follow_counts(user.id).await?;
    let posts = store.fetch_user_posts(user.id).await?;

    Ok(ProfileView::new(
        user,
        follow_counts,
        is_following,
        &posts,
        context,
    ))
}

async fn find_user(store: &dyn Store, handle: String) -> Result<User> {
    let Ok(parsed) = handle.parse::<UserHandle>() else {
        return Err(ServerError::UserByHandleNotFound(handle));
    };

    store
        .fetch_user_by_handle(&parsed)
        .await?
        .ok_or(ServerError::UserByHandleNotFound(handle))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/profile", rejection(ServerError))]
struct OwnProfilePath();

async fn get_own_profile(
    OwnProfilePath(): OwnProfilePath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<ProfileView>> {
    let context = ViewContext::new(&user, settings);
    Ok(Json(profile_view(&*store, &user, None, &context).await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/profile/edit", rejection(ServerError))]
struct EditProfilePath();

async fn edit_profile(
    EditProfilePath(): EditProfilePath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<ProfileView>> {
    let user = store
        .update_profile(user.id, &update)
        .await?
        .ok_or_else(|| ServerError::UserByHandleNotFound(user.handle.into_inner()))?;

    let context = ViewContext::new(&user, settings);
    Ok(Json(profile_view(&*store, &user, None, &context).await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/profile/{handle}", rejection(ServerError))]
struct ProfilePath {
    handle: String,
}

async fn get_profile(
    ProfilePath { handle }: ProfilePath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(viewer): AuthenticatedUser,
) -> Result<Json<ProfileView>> {
    let user = find_user(&*store, handle).await?;
    let is_following = if user.id == viewer.id {
        None
    } else {
        Some(store.is_following(viewer.id, user.id).await?)
    };

    let context = ViewContext::new(&viewer, settings);
    Ok(Json(
        profile_view(&*store, &user, is_following, &context).await?,
    ))
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct FollowState {
    is_following: bool,
    #[serde(flatten)]
    follow_counts: FollowCounts,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/follow/{handle}", rejection(ServerError))]
struct FollowPath {
    handle: String,
}

async fn follow(
    FollowPath { handle }: FollowPath,
    State(store): State<Arc<dyn Store>>,
    AuthenticatedUser(viewer): AuthenticatedUser,
) -> Result<Json<FollowState>> {
    let user = find_user(&*store, handle).await?;
    if user.id == viewer.id {
        return Err(ServerError::CannotFollowSelf);
    }

    store.follow(viewer.id, user.id).await?;
    debug!(follower = %viewer.handle, followee = %user.handle, "Followed user");

    Ok(Json(FollowState {
        is_following: true,
        follow_counts: store.fetch_follow_counts(user.id).await?,
    }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/unfollow/{handle}", rejection(ServerError))]
struct UnfollowPath {
    handle: String,
}

async fn unfollow(
    UnfollowPath { handle }: UnfollowPath,
    State(store): State<Arc<dyn Store>>,
    AuthenticatedUser(viewer): AuthenticatedUser,
) -> Result<Json<FollowState>> {
    let user = find_user(&*store, handle).await?;
    store.unfollow(viewer.id, user.id).await?;

    Ok(Json(FollowState {
        is_following: false,
        follow_counts: store.fetch_follow_counts(user.id).await?,
    }))
}
