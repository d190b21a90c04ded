use crate::server::{
    Result, ServerError, ServerRouter, Settings,
    auth::{ApiUser, AuthenticatedUser},
    json::{Created, Done, Json},
    routes::deleted,
    views::{CommentView, TimelineDetailView, TimelinePostView, ViewContext},
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use fukubun_common::model::{
    Id,
    post::{CommentMarker, CommentOutcome, CreatePost, LikeToggle, PostKind, PostMarker},
};
use fukubun_db::store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::UtcDateTime;
use tracing::debug;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(get_timeline)
        .typed_post(create_timeline_post)
        .typed_get(get_timeline_post)
        .typed_post(delete_timeline_post)
        .typed_post(toggle_like)
        .typed_post(add_comment)
        .typed_post(delete_comment)
}

/// Rejects posts that carry neither text nor an image.
pub(super) fn check_post(post: &CreatePost) -> Result<()> {
    let has_image = post.image.as_deref().is_some_and(|image| !image.is_empty());
    if post.message.trim().is_empty() && !has_image {
        return Err(ServerError::EmptyPost);
    }
    Ok(())
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/timeline", rejection(ServerError))]
struct TimelinePath();

async fn get_timeline(
    TimelinePath(): TimelinePath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Vec<TimelinePostView>>> {
    let context = ViewContext::new(&user, settings);
    let posts = store.fetch_posts(PostKind::Timeline).await?;

    Ok(Json(
        posts
            .iter()
            .map(|post| TimelinePostView::new(post, &context))
            .collect(),
    ))
}

async fn create_timeline_post(
    TimelinePath(): TimelinePath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(post): Json<CreatePost>,
) -> Result<Created<TimelinePostView>> {
    check_post(&post)?;
    let context = ViewContext::new(&user, settings);
    let post = store
        .create_post(&user, PostKind::Timeline, &post, context.now)
        .await?;

    Ok(Created(TimelinePostView::new(&post, &context)))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/timeline/{id}", rejection(ServerError))]
struct TimelinePostPath {
    id: Id<PostMarker>,
}

async fn get_timeline_post(
    TimelinePostPath { id }: TimelinePostPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<TimelineDetailView>> {
    let post = store
        .fetch_post(id)
        .await?
        .filter(|post| post.kind() == PostKind::Timeline)
        .ok_or(ServerError::PostByIdNotFound(id))?;

    let context = ViewContext::new(&user, settings);
    Ok(Json(TimelineDetailView::new(&post, &context)))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/timeline/{id}/delete", rejection(ServerError))]
struct DeleteTimelinePostPath {
    id: Id<PostMarker>,
}

async fn delete_timeline_post(
    DeleteTimelinePostPath { id }: DeleteTimelinePostPath,
    State(store): State<Arc<dyn Store>>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Done>> {
    let outcome = store
        .delete_post(id, PostKind::Timeline, &user.viewer())
        .await?;

    deleted(outcome, ServerError::PostByIdNotFound(id))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/like/{id}", rejection(ServerError))]
struct LikePath {
    id: Id<PostMarker>,
}

async fn toggle_like(
    LikePath { id }: LikePath,
    State(store): State<Arc<dyn Store>>,
    ApiUser(user): ApiUser,
) -> Result<Json<LikeToggle>> {
    let toggle = store
        .toggle_like(id, &user.handle)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;
    debug!(post = %id, handle = %user.handle, ?toggle, "Toggled like");

    Ok(Json(toggle))
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct CommentForm {
    #[serde(default)]
    message: String,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/comment/{id}", rejection(ServerError))]
struct CommentPath {
    id: Id<PostMarker>,
}

async fn add_comment(
    CommentPath { id }: CommentPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(form): Json<CommentForm>,
) -> Result<Created<CommentView>> {
    match store
        .add_comment(id, &user, &form.message, UtcDateTime::now())
        .await?
    {
        CommentOutcome::Added(comment) => {
            let context = ViewContext::new(&user, settings);
            Ok(Created(CommentView::new(&comment, &context)))
        }
        CommentOutcome::Rejected(rejection) => Err(rejection.into()),
        CommentOutcome::PostNotFound => Err(ServerError::PostByIdNotFound(id)),
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct CommentRemoval {
    removed: bool,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/comment/{post_id}/{comment_id}/delete", rejection(ServerError))]
struct DeleteCommentPath {
    post_id: Id<PostMarker>,
    comment_id: Id<CommentMarker>,
}

async fn delete_comment(
    DeleteCommentPath {
        post_id,
        comment_id,
    }: DeleteCommentPath,
    State(store): State<Arc<dyn Store>>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<CommentRemoval>> {
    let removed = store
        .delete_comment(post_id, comment_id, &user.viewer())
        .await?;

    Ok(Json(CommentRemoval { removed }))
}
