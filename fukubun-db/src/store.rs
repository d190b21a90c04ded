use async_trait::async_trait;
use fukubun_common::model::{
    Id, ModelValidationError,
    auth::{Authentication, AuthTokenHash, PasswordDigest},
    diary::{Diary, DiaryDate, DiaryEntry, DiaryMarker, DiaryWrite},
    post::{
        CommentMarker, CommentOutcome, CreatePost, DeleteOutcome, LikeToggle, Post, PostKind,
        PostMarker,
    },
    shelf::{Book, BookChange, BookMarker, BookMetadata, BookUpdate, Isbn},
    user::{
        CreateUser, FollowCounts, ProfileUpdate, Rating, Review, User, UserHandle, UserMarker,
        Viewer, ViewedPost,
    },
};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use time::UtcDateTime;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Persistence for every entity of the site.
///
/// Each mutation is a single atomic operation: implementations never let a
/// concurrent request observe or overwrite a half-applied change.
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns `None` when the handle is already taken.
    async fn create_user(&self, user: &CreateUser) -> Result<Option<User>>;
    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>>;
    async fn fetch_user_by_handle(&self, handle: &UserHandle) -> Result<Option<User>>;
    async fn fetch_credentials(&self, handle: &UserHandle)
    -> Result<Option<(User, PasswordDigest)>>;
    async fn update_profile(
        &self,
        user_id: Id<UserMarker>,
        update: &ProfileUpdate,
    ) -> Result<Option<User>>;

    async fn follow(&self, follower: Id<UserMarker>, followee: Id<UserMarker>) -> Result<()>;
    async fn unfollow(&self, follower: Id<UserMarker>, followee: Id<UserMarker>) -> Result<()>;
    async fn is_following(
        &self,
        follower: Id<UserMarker>,
        followee: Id<UserMarker>,
    ) -> Result<bool>;
    async fn fetch_follow_counts(&self, user_id: Id<UserMarker>) -> Result<FollowCounts>;

    async fn create_auth(&self, authentication: &Authentication) -> Result<()>;
    async fn fetch_auth(&self, token_hash: &AuthTokenHash) -> Result<Option<Authentication>>;
    async fn delete_auth(&self, token_hash: &AuthTokenHash) -> Result<()>;

    async fn create_post(
        &self,
        owner: &User,
        kind: PostKind,
        post: &CreatePost,
        at: UtcDateTime,
    ) -> Result<Post>;
    async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>>;
    /// Newest first.
    async fn fetch_posts(&self, kind: PostKind) -> Result<Vec<Post>>;
    /// Timeline posts of one user, newest first.
    async fn fetch_user_posts(&self, owner: Id<UserMarker>) -> Result<Vec<Post>>;
    /// Every post of `kind` in uniformly random order.
    async fn sample_posts(&self, kind: PostKind) -> Result<Vec<Post>>;
    async fn delete_post(
        &self,
        post_id: Id<PostMarker>,
        kind: PostKind,
        viewer: &Viewer,
    ) -> Result<DeleteOutcome>;

    /// Returns `None` when the post does not exist.
    async fn toggle_like(
        &self,
        post_id: Id<PostMarker>,
        handle: &UserHandle,
    ) -> Result<Option<LikeToggle>>;
    async fn add_comment(
        &self,
        post_id: Id<PostMarker>,
        author: &User,
        message: &str,
        at: UtcDateTime,
    ) -> Result<CommentOutcome>;
    async fn delete_comment(
        &self,
        post_id: Id<PostMarker>,
        comment_id: Id<CommentMarker>,
        viewer: &Viewer,
    ) -> Result<bool>;

    /// Returns `false` when the post does not exist.
    async fn save_post(&self, user_id: Id<UserMarker>, post_id: Id<PostMarker>) -> Result<bool>;
    async fn unsave_post(&self, user_id: Id<UserMarker>, post_id: Id<PostMarker>) -> Result<()>;
    async fn fetch_saved_post_ids(&self, user_id: Id<UserMarker>)
    -> Result<BTreeSet<Id<PostMarker>>>;
    async fn fetch_saved_posts(&self, user_id: Id<UserMarker>) -> Result<Vec<Post>>;

    async fn record_view(
        &self,
        user_id: Id<UserMarker>,
        post_id: Id<PostMarker>,
        at: UtcDateTime,
    ) -> Result<()>;
    /// Newest first.
    async fn fetch_view_log(&self, user_id: Id<UserMarker>) -> Result<Vec<ViewedPost<Post>>>;
    /// Removes the earliest history entry for the post.
    async fn remove_view(&self, user_id: Id<UserMarker>, post_id: Id<PostMarker>)
    -> Result<bool>;
    async fn clear_view_log(&self, user_id: Id<UserMarker>) -> Result<()>;

    /// Returns `false` when the post does not exist.
    async fn upsert_review(
        &self,
        user_id: Id<UserMarker>,
        post_id: Id<PostMarker>,
        rating: Rating,
        at: UtcDateTime,
    ) -> Result<bool>;
    async fn fetch_reviews(&self, user_id: Id<UserMarker>) -> Result<Vec<Review<Post>>>;

    async fn create_diary(
        &self,
        owner: Id<UserMarker>,
        entry: &DiaryEntry,
        at: UtcDateTime,
    ) -> Result<DiaryWrite>;
    async fn fetch_diary(&self, diary_id: Id<DiaryMarker>) -> Result<Option<Diary>>;
    /// Public entries plus the viewer's own, latest date first.
    async fn fetch_visible_diaries(
        &self,
        viewer: &Viewer,
        date: Option<DiaryDate>,
    ) -> Result<Vec<Diary>>;
    async fn fetch_public_diary_counts(&self) -> Result<BTreeMap<DiaryDate, u64>>;
    async fn fetch_user_diaries(&self, owner: Id<UserMarker>) -> Result<Vec<Diary>>;
    async fn update_diary(
        &self,
        diary_id: Id<DiaryMarker>,
        viewer: &Viewer,
        entry: &DiaryEntry,
        at: UtcDateTime,
    ) -> Result<DiaryWrite>;
    async fn delete_diary(
        &self,
        diary_id: Id<DiaryMarker>,
        viewer: &Viewer,
    ) -> Result<DeleteOutcome>;

    async fn fetch_book_by_isbn(&self, owner: Id<UserMarker>, isbn: &Isbn)
    -> Result<Option<Book>>;
    /// Returns `None` when the owner already shelved this ISBN.
    async fn create_book(
        &self,
        owner: Id<UserMarker>,
        isbn: &Isbn,
        metadata: &BookMetadata,
        at: UtcDateTime,
    ) -> Result<Option<Book>>;
    async fn fetch_book(&self, book_id: Id<BookMarker>, owner: Id<UserMarker>)
    -> Result<Option<Book>>;
    /// Newest first.
    async fn fetch_books(&self, owner: Id<UserMarker>) -> Result<Vec<Book>>;
    /// Reads the current row, applies `change` and writes it back atomically.
    async fn update_book(
        &self,
        book_id: Id<BookMarker>,
        owner: Id<UserMarker>,
        change: BookChange,
    ) -> Result<BookUpdate>;
}

