use crate::server::{
    Result, ServerError, ServerRouter, Settings,
    auth::AuthenticatedUser,
    json::{Created, Done, Json},
    routes::{deleted, timeline::check_post},
    views::{AnonymousDetailView, AnonymousPostView, ReviewView, ViewContext, ViewedPostView},
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use fukubun_common::model::{
    Id,
    post::{CreatePost, Post, PostKind, PostMarker},
    user::{Rating, User},
};
use fukubun_db::store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_anonymous)
        .typed_post(create_anonymous)
        .typed_get(get_anonymous)
        .typed_post(delete_anonymous)
        .typed_get(list_novels)
        .typed_post(create_novel)
        .typed_get(get_novel)
        .typed_post(delete_novel)
        .typed_get(list_saved)
        .typed_post(save)
        .typed_post(unsave)
        .typed_get(get_view_log)
        .typed_post(remove_view)
        .typed_post(clear_view_log)
        .typed_get(list_reviews)
        .typed_post(review)
}

/// An anonymous or novel post. Timeline posts are treated as absent.
async fn fetch_anonymous(store: &dyn Store, id: Id<PostMarker>) -> Result<Post> {
    store
        .fetch_post(id)
        .await?
        .filter(|post| post.kind().hides_author())
        .ok_or(ServerError::PostByIdNotFound(id))
}

async fn list(
    store: &dyn Store,
    user: &User,
    kind: PostKind,
    settings: Settings,
) -> Result<Json<Vec<AnonymousPostView>>> {
    let context = ViewContext::new(user, settings);
    let posts = store.sample_posts(kind).await?;
    let saved = store.fetch_saved_post_ids(user.id).await?;

    Ok(Json(
        posts
            .iter()
            .map(|post| AnonymousPostView::new(post, &context, &saved))
            .collect(),
    ))
}

async fn create(
    store: &dyn Store,
    user: &User,
    kind: PostKind,
    post: &CreatePost,
    settings: Settings,
) -> Result<Created<AnonymousPostView>> {
    check_post(post)?;
    let context = ViewContext::new(user, settings);
    let post = store.create_post(user, kind, post, context.now).await?;

    Ok(Created(AnonymousPostView::new(
        &post,
        &context,
        &Default::default(),
    )))
}

/// Shows a post and appends it to the viewer's history.
async fn detail(
    store: &dyn Store,
    user: &User,
    kind: PostKind,
    id: Id<PostMarker>,
    settings: Settings,
) -> Result<Json<AnonymousDetailView>> {
    let post = store
        .fetch_post(id)
        .await?
        .filter(|post| post.kind() == kind)
        .ok_or(ServerError::PostByIdNotFound(id))?;

    let context = ViewContext::new(user, settings);
    store.record_view(user.id, id, context.now).await?;
    let saved = store.fetch_saved_post_ids(user.id).await?;

    Ok(Json(AnonymousDetailView::new(&post, &context, &saved)))
}

async fn delete(
    store: &dyn Store,
    user: &User,
    kind: PostKind,
    id: Id<PostMarker>,
) -> Result<Json<Done>> {
    let outcome = store.delete_post(id, kind, &user.viewer()).await?;
    debug!(post = %id, ?outcome, "Anonymous post deletion");

    deleted(outcome, ServerError::PostByIdNotFound(id))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/tokumei", rejection(ServerError))]
struct AnonymousPath();

async fn list_anonymous(
    AnonymousPath(): AnonymousPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Vec<AnonymousPostView>>> {
    list(&*store, &user, PostKind::Anonymous, settings).await
}

async fn create_anonymous(
    AnonymousPath(): AnonymousPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(post): Json<CreatePost>,
) -> Result<Created<AnonymousPostView>> {
    create(&*store, &user, PostKind::Anonymous, &post, settings).await
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/tokumei/{id}", rejection(ServerError))]
struct AnonymousPostPath {
    id: Id<PostMarker>,
}

async fn get_anonymous(
    AnonymousPostPath { id }: AnonymousPostPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<AnonymousDetailView>> {
    detail(&*store, &user, PostKind::Anonymous, id, settings).await
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/tokumei/{id}/delete", rejection(ServerError))]
struct DeleteAnonymousPath {
    id: Id<PostMarker>,
}

async fn delete_anonymous(
    DeleteAnonymousPath { id }: DeleteAnonymousPath,
    State(store): State<Arc<dyn Store>>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Done>> {
    delete(&*store, &user, PostKind::Anonymous, id).await
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/tokumei_novel", rejection(ServerError))]
struct NovelsPath();

async fn list_novels(
    NovelsPath(): NovelsPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Vec<AnonymousPostView>>> {
    list(&*store, &user, PostKind::Novel, settings).await
}

async fn create_novel(
    NovelsPath(): NovelsPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(post): Json<CreatePost>,
) -> Result<Created<AnonymousPostView>> {
    create(&*store, &user, PostKind::Novel, &post, settings).await
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/tokumei_novel/{id}", rejection(ServerError))]
struct NovelPath {
    id: Id<PostMarker>,
}

async fn get_novel(
    NovelPath { id }: NovelPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<AnonymousDetailView>> {
    detail(&*store, &user, PostKind::Novel, id, settings).await
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/tokumei_novel/{id}/delete", rejection(ServerError))]
struct DeleteNovelPath {
    id: Id<PostMarker>,
}

async fn delete_novel(
    DeleteNovelPath { id }: DeleteNovelPath,
    State(store): State<Arc<dyn Store>>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Done>> {
    delete(&*store, &user, PostKind::Novel, id).await
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/tokumei_save", rejection(ServerError))]
struct SavedPath();

async fn list_saved(
    SavedPath(): SavedPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Vec<AnonymousPostView>>> {
    let context = ViewContext::new(&user, settings);
    let posts = store.fetch_saved_posts(user.id).await?;
    let saved = posts.iter().map(|post| post.id).collect();

    Ok(Json(
        posts
            .iter()
            .map(|post| AnonymousPostView::new(post, &context, &saved))
            .collect(),
    ))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/tokumei_save/{id}", rejection(ServerError))]
struct SavePath {
    id: Id<PostMarker>,
}

async fn save(
    SavePath { id }: SavePath,
    State(store): State<Arc<dyn Store>>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Done>> {
    fetch_anonymous(&*store, id).await?;
    if !store.save_post(user.id, id).await? {
        return Err(ServerError::PostByIdNotFound(id));
    }

    Ok(Done::OK)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/tokumei_save/{id}/remove", rejection(ServerError))]
struct UnsavePath {
    id: Id<PostMarker>,
}

async fn unsave(
    UnsavePath { id }: UnsavePath,
    State(store): State<Arc<dyn Store>>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Done>> {
    store.unsave_post(user.id, id).await?;

    Ok(Done::OK)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/tokumei_log", rejection(ServerError))]
struct ViewLogPath();

async fn get_view_log(
    ViewLogPath(): ViewLogPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Vec<ViewedPostView>>> {
    let context = ViewContext::new(&user, settings);
    let log = store.fetch_view_log(user.id).await?;
    let saved = store.fetch_saved_post_ids(user.id).await?;

    Ok(Json(
        log.iter()
            .map(|viewed| ViewedPostView::new(viewed, &context, &saved))
            .collect(),
    ))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/tokumei_log/{id}/delete", rejection(ServerError))]
struct RemoveViewPath {
    id: Id<PostMarker>,
}

async fn remove_view(
    RemoveViewPath { id }: RemoveViewPath,
    State(store): State<Arc<dyn Store>>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Done>> {
    if !store.remove_view(user.id, id).await? {
        return Err(ServerError::PostByIdNotFound(id));
    }

    Ok(Done::OK)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/tokumei_log/clear", rejection(ServerError))]
struct ClearViewLogPath();

async fn clear_view_log(
    ClearViewLogPath(): ClearViewLogPath,
    State(store): State<Arc<dyn Store>>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Done>> {
    store.clear_view_log(user.id).await?;

    Ok(Done::OK)
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct ReviewForm {
    post_id: Id<PostMarker>,
    rating: Rating,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct ReviewOutcome {
    post_id: Id<PostMarker>,
    rating: Rating,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/tokumei_review", rejection(ServerError))]
struct ReviewsPath();

async fn list_reviews(
    ReviewsPath(): ReviewsPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Vec<ReviewView>>> {
    let context = ViewContext::new(&user, settings);
    let reviews = store.fetch_reviews(user.id).await?;
    let saved = store.fetch_saved_post_ids(user.id).await?;

    Ok(Json(
        reviews
            .iter()
            .map(|review| ReviewView::new(review, &context, &saved))
            .collect(),
    ))
}

async fn review(
    ReviewsPath(): ReviewsPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(form): Json<ReviewForm>,
) -> Result<Json<ReviewOutcome>> {
    fetch_anonymous(&*store, form.post_id).await?;
    let now = ViewContext::new(&user, settings).now;
    if !store
        .upsert_review(user.id, form.post_id, form.rating, now)
        .await?
    {
        return Err(ServerError::PostByIdNotFound(form.post_id));
    }

    Ok(Json(ReviewOutcome {
        post_id: form.post_id,
        rating: form.rating,
    }))
}
