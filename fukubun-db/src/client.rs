use crate::{
    record::{
        AuthenticationRecord, BookRecord, CommentRecord, CredentialsRecord, DiaryRecord,
        LikeRecord, PostRecord, ReviewRecord, UserRecord, ViewRecord, counter, to_primitive,
    },
    store::{Result, Store},
};
use async_trait::async_trait;
use fukubun_common::{
    model::{
        FukubunSnowflakeGenerator, Id, ModelValidationError,
        auth::{AuthTokenHash, Authentication, PasswordDigest},
        diary::{Diary, DiaryDate, DiaryEntry, DiaryMarker, DiaryWrite},
        post::{
            Comment, CommentMarker, CommentOutcome, CommentRejection, CreatePost, DeleteOutcome,
            LikeToggle, Post, PostKind, PostMarker, comment_message,
        },
        shelf::{Book, BookChange, BookMarker, BookMetadata, BookUpdate, Isbn},
        user::{
            CreateUser, DEFAULT_ICON, FollowCounts, ProfileUpdate, Rating, Review, User,
            UserHandle, UserMarker, ViewMarker, ViewedPost, Viewer,
        },
    },
    snowflake::{ProcessId, WorkerId},
};
use parking_lot::Mutex;
use sqlx::{PgPool, migrate::MigrateError, query, query_as, query_scalar};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use time::{Date, UtcDateTime};
use tracing::debug;

macro_rules! user_columns {
    () => {
        "users.user_snowflake, users.handle, users.name, users.bio, users.icon"
    };
}

macro_rules! post_columns {
    () => {
        concat!(
            "posts.post_snowflake, posts.kind, posts.title, posts.message, posts.image, \
            posts.created_at, ",
            user_columns!()
        )
    };
}

macro_rules! post_owner_join {
    () => {
        " JOIN users.users ON users.user_snowflake = posts.owner_snowflake "
    };
}

macro_rules! diary_columns {
    () => {
        "diary_snowflake, owner_snowflake, title, content, date, is_public, created_at, \
        updated_at"
    };
}

macro_rules! book_columns {
    () => {
        "book_snowflake, owner_snowflake, isbn, title, authors, thumbnail, reading_note, review, \
        total_seconds, today_seconds, last_read_at, is_reading, finished_at, created_at"
    };
}

/// Store backed by PostgreSQL.
pub struct DbClient {
    pool: PgPool,
    snowflake_generator: Mutex<FukubunSnowflakeGenerator>,
}

impl DbClient {
    #[must_use]
    pub fn new(pool: PgPool, worker_id: WorkerId, process_id: ProcessId) -> Self {
        let snowflake_generator =
            Mutex::new(FukubunSnowflakeGenerator::new(worker_id, process_id));

        Self {
            pool,
            snowflake_generator,
        }
    }

    pub async fn migrate(&self) -> Result<(), MigrateError> {
        sqlx::migrate!().run(&self.pool).await
    }

    fn next_id<Marker>(&self) -> Id<Marker> {
        self.snowflake_generator.lock().generate().into()
    }

    async fn post_exists(&self, post_id: Id<PostMarker>) -> Result<bool> {
        let exists =
            query_scalar("SELECT EXISTS (SELECT 1 FROM posts.posts WHERE post_snowflake = $1)")
                .bind(post_id.as_i64())
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }

    /// Loads likes and comments for freshly fetched post rows.
    async fn with_interactions(&self, records: Vec<PostRecord>) -> Result<Vec<Post>> {
        let mut posts = records
            .into_iter()
            .map(Post::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        if posts.is_empty() {
            return Ok(posts);
        }

        // History entries repeat posts, so one id may sit at several positions.
        let post_ids: Vec<i64> = posts.iter().map(|post| post.id.as_i64()).collect();
        let mut positions: HashMap<i64, Vec<usize>> = HashMap::new();
        for (position, &post_id) in post_ids.iter().enumerate() {
            positions.entry(post_id).or_default().push(position);
        }

        let likes: Vec<LikeRecord> = query_as(
            "
            SELECT post_snowflake, handle
            FROM posts.likes
            WHERE post_snowflake = ANY($1)
            ",
        )
        .bind(post_ids.as_slice())
        .fetch_all(&self.pool)
        .await?;

        for like in likes {
            let handle = UserHandle::new(like.handle).map_err(ModelValidationError::from)?;
            for &position in positions.get(&like.post_snowflake).into_iter().flatten() {
                posts[position].liked_users.insert(handle.clone());
            }
        }

        let comments: Vec<CommentRecord> = query_as(concat!(
            "SELECT comments.comment_snowflake, comments.post_snowflake, comments.message, \
            comments.created_at, ",
            user_columns!(),
            " FROM posts.comments \
            JOIN users.users ON users.user_snowflake = comments.author_snowflake \
            WHERE comments.post_snowflake = ANY($1) \
            ORDER BY comments.created_at, comments.comment_snowflake"
        ))
        .bind(post_ids.as_slice())
        .fetch_all(&self.pool)
        .await?;

        for record in comments {
            let post_snowflake = record.post_snowflake;
            let comment = Comment::try_from(record)?;
            for &position in positions.get(&post_snowflake).into_iter().flatten() {
                posts[position].comments.push(comment.clone());
            }
        }

        Ok(posts)
    }
}

#[async_trait]
impl Store for DbClient {
    async fn create_user(&self, user: &CreateUser) -> Result<Option<User>> {
        let user_id: Id<UserMarker> = self.next_id();

        let record: Option<UserRecord> = query_as(concat!(
            "INSERT INTO users.users (user_snowflake, handle, name, bio, icon, password_digest) \
            VALUES ($1, $2, $3, '', $4, $5) \
            ON CONFLICT (handle) DO NOTHING \
            RETURNING ",
            user_columns!()
        ))
        .bind(user_id.as_i64())
        .bind(user.handle.get())
        .bind(&user.name)
        .bind(DEFAULT_ICON)
        .bind(user.password.get())
        .fetch_optional(&self.pool)
        .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        let record: Option<UserRecord> = query_as(concat!(
            "SELECT ",
            user_columns!(),
            " FROM users.users WHERE users.user_snowflake = $1"
        ))
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    async fn fetch_user_by_handle(&self, handle: &UserHandle) -> Result<Option<User>> {
        let record: Option<UserRecord> = query_as(concat!(
            "SELECT ",
            user_columns!(),
            " FROM users.users WHERE users.handle = $1"
        ))
        .bind(handle.get())
        .fetch_optional(&self.pool)
        .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    async fn fetch_credentials(
        &self,
        handle: &UserHandle,
    ) -> Result<Option<(User, PasswordDigest)>> {
        let record: Option<CredentialsRecord> = query_as(concat!(
            "SELECT ",
            user_columns!(),
            ", users.password_digest FROM users.users WHERE users.handle = $1"
        ))
        .bind(handle.get())
        .fetch_optional(&self.pool)
        .await?;

        let credentials = record
            .map(<(User, PasswordDigest)>::try_from)
            .transpose()?;
        Ok(credentials)
    }

    async fn update_profile(
        &self,
        user_id: Id<UserMarker>,
        update: &ProfileUpdate,
    ) -> Result<Option<User>> {
        let record: Option<UserRecord> = query_as(concat!(
            "UPDATE users.users \
            SET name = $2, bio = $3, icon = COALESCE($4, icon) \
            WHERE user_snowflake = $1 \
            RETURNING ",
            user_columns!()
        ))
        .bind(user_id.as_i64())
        .bind(&update.name)
        .bind(&update.bio)
        .bind(update.icon_change())
        .fetch_optional(&self.pool)
        .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    async fn follow(&self, follower: Id<UserMarker>, followee: Id<UserMarker>) -> Result<()> {
        query(
            "
            INSERT INTO users.follows (follower_snowflake, followee_snowflake)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(follower.as_i64())
        .bind(followee.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn unfollow(&self, follower: Id<UserMarker>, followee: Id<UserMarker>) -> Result<()> {
        query(
            "
            DELETE FROM users.follows
            WHERE follower_snowflake = $1 AND followee_snowflake = $2
            ",
        )
        .bind(follower.as_i64())
        .bind(followee.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn is_following(
        &self,
        follower: Id<UserMarker>,
        followee: Id<UserMarker>,
    ) -> Result<bool> {
        let following = query_scalar(
            "
            SELECT EXISTS (
                SELECT 1 FROM users.follows
                WHERE follower_snowflake = $1 AND followee_snowflake = $2
            )
            ",
        )
        .bind(follower.as_i64())
        .bind(followee.as_i64())
        .fetch_one(&self.pool)
        .await?;

        Ok(following)
    }

    async fn fetch_follow_counts(&self, user_id: Id<UserMarker>) -> Result<FollowCounts> {
        let (following, followers): (i64, i64) = query_as(
            "
            SELECT
                (SELECT COUNT(*) FROM users.follows WHERE follower_snowflake = $1),
                (SELECT COUNT(*) FROM users.follows WHERE followee_snowflake = $1)
            ",
        )
        .bind(user_id.as_i64())
        .fetch_one(&self.pool)
        .await?;

        Ok(FollowCounts {
            following: counter(following)?,
            followers: counter(followers)?,
        })
    }

    async fn create_auth(&self, authentication: &Authentication) -> Result<()> {
        query(
            "
            INSERT INTO users.authentications
                (token_hash, user_snowflake, created_at, expires_after_seconds)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(&authentication.token_hash.0[..])
        .bind(authentication.user.as_i64())
        .bind(to_primitive(authentication.created_at))
        .bind(
            authentication
                .expires_after
                .map(|expires_after| expires_after.get().whole_seconds()),
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_auth(&self, token_hash: &AuthTokenHash) -> Result<Option<Authentication>> {
        let record: Option<AuthenticationRecord> = query_as(
            "
            SELECT user_snowflake, token_hash, created_at, expires_after_seconds
            FROM users.authentications
            WHERE token_hash = $1
            ",
        )
        .bind(&token_hash.0[..])
        .fetch_optional(&self.pool)
        .await?;

        let authentication = record.map(Authentication::try_from).transpose()?;
        Ok(authentication)
    }

    async fn delete_auth(&self, token_hash: &AuthTokenHash) -> Result<()> {
        query("DELETE FROM users.authentications WHERE token_hash = $1")
            .bind(&token_hash.0[..])
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn create_post(
        &self,
        owner: &User,
        kind: PostKind,
        post: &CreatePost,
        at: UtcDateTime,
    ) -> Result<Post> {
        let post = Post::new(self.next_id(), owner, kind, post, at);

        query(
            "
            INSERT INTO posts.posts
                (post_snowflake, kind, owner_snowflake, title, message, image, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(post.id.as_i64())
        .bind(kind.as_str())
        .bind(owner.id.as_i64())
        .bind(post.title())
        .bind(&post.message)
        .bind(post.image.as_deref())
        .bind(to_primitive(at))
        .execute(&self.pool)
        .await?;

        debug!(post = %post.id, kind = kind.as_str(), "Created post");
        Ok(post)
    }

    async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let record: Option<PostRecord> = query_as(concat!(
            "SELECT ",
            post_columns!(),
            " FROM posts.posts",
            post_owner_join!(),
            "WHERE posts.post_snowflake = $1"
        ))
        .bind(post_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        let posts = self.with_interactions(record.into_iter().collect()).await?;
        Ok(posts.into_iter().next())
    }

    async fn fetch_posts(&self, kind: PostKind) -> Result<Vec<Post>> {
        let records: Vec<PostRecord> = query_as(concat!(
            "SELECT ",
            post_columns!(),
            " FROM posts.posts",
            post_owner_join!(),
            "WHERE posts.kind = $1 \
            ORDER BY posts.created_at DESC, posts.post_snowflake DESC"
        ))
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        self.with_interactions(records).await
    }

    async fn fetch_user_posts(&self, owner: Id<UserMarker>) -> Result<Vec<Post>> {
        let records: Vec<PostRecord> = query_as(concat!(
            "SELECT ",
            post_columns!(),
            " FROM posts.posts",
            post_owner_join!(),
            "WHERE posts.kind = 'timeline' AND posts.owner_snowflake = $1 \
            ORDER BY posts.created_at DESC, posts.post_snowflake DESC"
        ))
        .bind(owner.as_i64())
        .fetch_all(&self.pool)
        .await?;

        self.with_interactions(records).await
    }

    async fn sample_posts(&self, kind: PostKind) -> Result<Vec<Post>> {
        let records: Vec<PostRecord> = query_as(concat!(
            "SELECT ",
            post_columns!(),
            " FROM posts.posts",
            post_owner_join!(),
            "WHERE posts.kind = $1 \
            ORDER BY random()"
        ))
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        self.with_interactions(records).await
    }

    async fn delete_post(
        &self,
        post_id: Id<PostMarker>,
        kind: PostKind,
        viewer: &Viewer,
    ) -> Result<DeleteOutcome> {
        let mut tx = self.pool.begin().await?;

        let record: Option<PostRecord> = query_as(concat!(
            "SELECT ",
            post_columns!(),
            " FROM posts.posts",
            post_owner_join!(),
            "WHERE posts.post_snowflake = $1 AND posts.kind = $2 \
            FOR UPDATE OF posts"
        ))
        .bind(post_id.as_i64())
        .bind(kind.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(record) = record else {
            return Ok(DeleteOutcome::NotFound);
        };
        if !Post::try_from(record)?.deletable_by(viewer) {
            return Ok(DeleteOutcome::Forbidden);
        }

        query("DELETE FROM posts.posts WHERE post_snowflake = $1")
            .bind(post_id.as_i64())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(post = %post_id, "Deleted post");
        Ok(DeleteOutcome::Deleted)
    }

    async fn toggle_like(
        &self,
        post_id: Id<PostMarker>,
        handle: &UserHandle,
    ) -> Result<Option<LikeToggle>> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<i64> = query_scalar(
            "SELECT post_snowflake FROM posts.posts WHERE post_snowflake = $1 FOR UPDATE",
        )
        .bind(post_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?;
        if locked.is_none() {
            return Ok(None);
        }

        let unliked = query("DELETE FROM posts.likes WHERE post_snowflake = $1 AND handle = $2")
            .bind(post_id.as_i64())
            .bind(handle.get())
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;

        if !unliked {
            query("INSERT INTO posts.likes (post_snowflake, handle) VALUES ($1, $2)")
                .bind(post_id.as_i64())
                .bind(handle.get())
                .execute(&mut *tx)
                .await?;
        }

        let likes: i64 = query_scalar("SELECT COUNT(*) FROM posts.likes WHERE post_snowflake = $1")
            .bind(post_id.as_i64())
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        let likes = usize::try_from(counter(likes)?).unwrap_or(usize::MAX);
        Ok(Some(LikeToggle {
            likes,
            is_liked: !unliked,
        }))
    }

    async fn add_comment(
        &self,
        post_id: Id<PostMarker>,
        author: &User,
        message: &str,
        at: UtcDateTime,
    ) -> Result<CommentOutcome> {
        if !self.post_exists(post_id).await? {
            return Ok(CommentOutcome::PostNotFound);
        }

        let message = match comment_message(message) {
            Ok(message) => message,
            Err(rejection) => return Ok(CommentOutcome::Rejected(rejection)),
        };

        let comment_id: Id<CommentMarker> = self.next_id();
        let inserted: Option<i64> = query_scalar(
            "
            INSERT INTO posts.comments
                (comment_snowflake, post_snowflake, author_snowflake, message, created_at)
            SELECT $1, post_snowflake, $3, $4, $5
            FROM posts.posts
            WHERE post_snowflake = $2
            ON CONFLICT (post_snowflake, author_snowflake) DO NOTHING
            RETURNING comment_snowflake
            ",
        )
        .bind(comment_id.as_i64())
        .bind(post_id.as_i64())
        .bind(author.id.as_i64())
        .bind(message)
        .bind(to_primitive(at))
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_none() {
            // Nothing is inserted either when the post vanished meanwhile.
            if !self.post_exists(post_id).await? {
                return Ok(CommentOutcome::PostNotFound);
            }
            return Ok(CommentOutcome::Rejected(CommentRejection::AlreadyCommented));
        }

        Ok(CommentOutcome::Added(Comment {
            id: comment_id,
            author: author.clone(),
            message: message.to_owned(),
            created_at: at,
        }))
    }

    async fn delete_comment(
        &self,
        post_id: Id<PostMarker>,
        comment_id: Id<CommentMarker>,
        viewer: &Viewer,
    ) -> Result<bool> {
        let removed = query(
            "
            DELETE FROM posts.comments
            WHERE comment_snowflake = $1 AND post_snowflake = $2 AND author_snowflake = $3
            ",
        )
        .bind(comment_id.as_i64())
        .bind(post_id.as_i64())
        .bind(viewer.id.as_i64())
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        Ok(removed)
    }

    async fn save_post(&self, user_id: Id<UserMarker>, post_id: Id<PostMarker>) -> Result<bool> {
        if !self.post_exists(post_id).await? {
            return Ok(false);
        }

        query(
            "
            INSERT INTO users.saved_posts (user_snowflake, post_snowflake)
            SELECT $1, post_snowflake FROM posts.posts WHERE post_snowflake = $2
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(user_id.as_i64())
        .bind(post_id.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(true)
    }

    async fn unsave_post(&self, user_id: Id<UserMarker>, post_id: Id<PostMarker>) -> Result<()> {
        query("DELETE FROM users.saved_posts WHERE user_snowflake = $1 AND post_snowflake = $2")
            .bind(user_id.as_i64())
            .bind(post_id.as_i64())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn fetch_saved_post_ids(
        &self,
        user_id: Id<UserMarker>,
    ) -> Result<BTreeSet<Id<PostMarker>>> {
        let post_ids: Vec<i64> =
            query_scalar("SELECT post_snowflake FROM users.saved_posts WHERE user_snowflake = $1")
                .bind(user_id.as_i64())
                .fetch_all(&self.pool)
                .await?;

        Ok(post_ids.into_iter().map(Id::from_i64).collect())
    }

    async fn fetch_saved_posts(&self, user_id: Id<UserMarker>) -> Result<Vec<Post>> {
        let records: Vec<PostRecord> = query_as(concat!(
            "SELECT ",
            post_columns!(),
            " FROM users.saved_posts saved \
            JOIN posts.posts ON posts.post_snowflake = saved.post_snowflake",
            post_owner_join!(),
            "WHERE saved.user_snowflake = $1 \
            ORDER BY posts.created_at DESC, posts.post_snowflake DESC"
        ))
        .bind(user_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        self.with_interactions(records).await
    }

    async fn record_view(
        &self,
        user_id: Id<UserMarker>,
        post_id: Id<PostMarker>,
        at: UtcDateTime,
    ) -> Result<()> {
        let view_id: Id<ViewMarker> = self.next_id();

        query(
            "
            INSERT INTO users.views (view_snowflake, user_snowflake, post_snowflake, viewed_at)
            SELECT $1, $2, post_snowflake, $4 FROM posts.posts WHERE post_snowflake = $3
            ",
        )
        .bind(view_id.as_i64())
        .bind(user_id.as_i64())
        .bind(post_id.as_i64())
        .bind(to_primitive(at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_view_log(&self, user_id: Id<UserMarker>) -> Result<Vec<ViewedPost<Post>>> {
        let records: Vec<ViewRecord> = query_as(concat!(
            "SELECT views.viewed_at, ",
            post_columns!(),
            " FROM users.views \
            JOIN posts.posts ON posts.post_snowflake = views.post_snowflake",
            post_owner_join!(),
            "WHERE views.user_snowflake = $1 \
            ORDER BY views.viewed_at DESC, views.view_snowflake DESC"
        ))
        .bind(user_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        let (viewed_at, posts): (Vec<_>, Vec<_>) = records
            .into_iter()
            .map(|record| (record.viewed_at.as_utc(), record.post))
            .unzip();
        let posts = self.with_interactions(posts).await?;

        Ok(posts
            .into_iter()
            .zip(viewed_at)
            .map(|(post, viewed_at)| ViewedPost { post, viewed_at })
            .collect())
    }

    async fn remove_view(
        &self,
        user_id: Id<UserMarker>,
        post_id: Id<PostMarker>,
    ) -> Result<bool> {
        let removed = query(
            "
            DELETE FROM users.views
            WHERE view_snowflake = (
                SELECT view_snowflake FROM users.views
                WHERE user_snowflake = $1 AND post_snowflake = $2
                ORDER BY viewed_at, view_snowflake
                LIMIT 1
            )
            ",
        )
        .bind(user_id.as_i64())
        .bind(post_id.as_i64())
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        Ok(removed)
    }

    async fn clear_view_log(&self, user_id: Id<UserMarker>) -> Result<()> {
        query("DELETE FROM users.views WHERE user_snowflake = $1")
            .bind(user_id.as_i64())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn upsert_review(
        &self,
        user_id: Id<UserMarker>,
        post_id: Id<PostMarker>,
        rating: Rating,
        at: UtcDateTime,
    ) -> Result<bool> {
        let written = query(
            "
            INSERT INTO users.reviews (user_snowflake, post_snowflake, rating, reviewed_at)
            SELECT $1, post_snowflake, $3, $4 FROM posts.posts WHERE post_snowflake = $2
            ON CONFLICT (user_snowflake, post_snowflake)
            DO UPDATE SET rating = EXCLUDED.rating, reviewed_at = EXCLUDED.reviewed_at
            ",
        )
        .bind(user_id.as_i64())
        .bind(post_id.as_i64())
        .bind(rating.as_str())
        .bind(to_primitive(at))
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        Ok(written)
    }

    async fn fetch_reviews(&self, user_id: Id<UserMarker>) -> Result<Vec<Review<Post>>> {
        let records: Vec<ReviewRecord> = query_as(concat!(
            "SELECT reviews.rating, reviews.reviewed_at, ",
            post_columns!(),
            " FROM users.reviews \
            JOIN posts.posts ON posts.post_snowflake = reviews.post_snowflake",
            post_owner_join!(),
            "WHERE reviews.user_snowflake = $1 \
            ORDER BY reviews.reviewed_at DESC"
        ))
        .bind(user_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        let mut ratings = Vec::with_capacity(records.len());
        let mut posts = Vec::with_capacity(records.len());
        for record in records {
            let rating = record
                .rating
                .parse::<Rating>()
                .map_err(ModelValidationError::from)?;
            ratings.push((rating, record.reviewed_at.as_utc()));
            posts.push(record.post);
        }
        let posts = self.with_interactions(posts).await?;

        Ok(posts
            .into_iter()
            .zip(ratings)
            .map(|(post, (rating, reviewed_at))| Review {
                post,
                rating,
                reviewed_at,
            })
            .collect())
    }

    async fn create_diary(
        &self,
        owner: Id<UserMarker>,
        entry: &DiaryEntry,
        at: UtcDateTime,
    ) -> Result<DiaryWrite> {
        let diary_id: Id<DiaryMarker> = self.next_id();

        let record: Option<DiaryRecord> = query_as(concat!(
            "INSERT INTO diaries.diaries \
            (diary_snowflake, owner_snowflake, title, content, date, is_public, created_at, \
            updated_at) \
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7) \
            ON CONFLICT (owner_snowflake, date) DO NOTHING \
            RETURNING ",
            diary_columns!()
        ))
        .bind(diary_id.as_i64())
        .bind(owner.as_i64())
        .bind(&entry.title)
        .bind(&entry.content)
        .bind(entry.date.get())
        .bind(entry.is_public)
        .bind(to_primitive(at))
        .fetch_optional(&self.pool)
        .await?;

        match record {
            Some(record) => Ok(DiaryWrite::Written(record.try_into()?)),
            None => Ok(DiaryWrite::DateTaken),
        }
    }

    async fn fetch_diary(&self, diary_id: Id<DiaryMarker>) -> Result<Option<Diary>> {
        let record: Option<DiaryRecord> = query_as(concat!(
            "SELECT ",
            diary_columns!(),
            " FROM diaries.diaries WHERE diary_snowflake = $1"
        ))
        .bind(diary_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        let diary = record.map(Diary::try_from).transpose()?;
        Ok(diary)
    }

    async fn fetch_visible_diaries(
        &self,
        viewer: &Viewer,
        date: Option<DiaryDate>,
    ) -> Result<Vec<Diary>> {
        let records: Vec<DiaryRecord> = query_as(concat!(
            "SELECT ",
            diary_columns!(),
            " FROM diaries.diaries \
            WHERE (is_public OR owner_snowflake = $1) AND ($2::DATE IS NULL OR date = $2) \
            ORDER BY date DESC, created_at DESC"
        ))
        .bind(viewer.id.as_i64())
        .bind(date.map(DiaryDate::get))
        .fetch_all(&self.pool)
        .await?;

        let diaries = records
            .into_iter()
            .map(Diary::try_from)
            .collect::<Result<_, _>>()?;
        Ok(diaries)
    }

    async fn fetch_public_diary_counts(&self) -> Result<BTreeMap<DiaryDate, u64>> {
        let rows: Vec<(Date, i64)> = query_as(
            "
            SELECT date, COUNT(*)
            FROM diaries.diaries
            WHERE is_public
            GROUP BY date
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(date, count)| Ok((DiaryDate::new(date), counter(count)?)))
            .collect()
    }

    async fn fetch_user_diaries(&self, owner: Id<UserMarker>) -> Result<Vec<Diary>> {
        let records: Vec<DiaryRecord> = query_as(concat!(
            "SELECT ",
            diary_columns!(),
            " FROM diaries.diaries WHERE owner_snowflake = $1 ORDER BY date"
        ))
        .bind(owner.as_i64())
        .fetch_all(&self.pool)
        .await?;

        let diaries = records
            .into_iter()
            .map(Diary::try_from)
            .collect::<Result<_, _>>()?;
        Ok(diaries)
    }

    async fn update_diary(
        &self,
        diary_id: Id<DiaryMarker>,
        viewer: &Viewer,
        entry: &DiaryEntry,
        at: UtcDateTime,
    ) -> Result<DiaryWrite> {
        let mut tx = self.pool.begin().await?;

        let record: Option<DiaryRecord> = query_as(concat!(
            "SELECT ",
            diary_columns!(),
            " FROM diaries.diaries WHERE diary_snowflake = $1 FOR UPDATE"
        ))
        .bind(diary_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = record.map(Diary::try_from).transpose()? else {
            return Ok(DiaryWrite::NotFound);
        };
        if !current.visible_to(viewer) {
            return Ok(DiaryWrite::NotFound);
        }
        if !current.owned_by(viewer) {
            return Ok(DiaryWrite::Forbidden);
        }

        let updated: Result<DiaryRecord, sqlx::Error> = query_as(concat!(
            "UPDATE diaries.diaries \
            SET title = $2, content = $3, date = $4, is_public = $5, updated_at = $6 \
            WHERE diary_snowflake = $1 \
            RETURNING ",
            diary_columns!()
        ))
        .bind(diary_id.as_i64())
        .bind(&entry.title)
        .bind(&entry.content)
        .bind(entry.date.get())
        .bind(entry.is_public)
        .bind(to_primitive(at))
        .fetch_one(&mut *tx)
        .await;

        let record = match updated {
            Ok(record) => record,
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                return Ok(DiaryWrite::DateTaken);
            }
            Err(err) => return Err(err.into()),
        };
        tx.commit().await?;

        Ok(DiaryWrite::Written(record.try_into()?))
    }

    async fn delete_diary(
        &self,
        diary_id: Id<DiaryMarker>,
        viewer: &Viewer,
    ) -> Result<DeleteOutcome> {
        let mut tx = self.pool.begin().await?;

        let record: Option<DiaryRecord> = query_as(concat!(
            "SELECT ",
            diary_columns!(),
            " FROM diaries.diaries WHERE diary_snowflake = $1 FOR UPDATE"
        ))
        .bind(diary_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(diary) = record.map(Diary::try_from).transpose()? else {
            return Ok(DeleteOutcome::NotFound);
        };
        if !diary.visible_to(viewer) {
            return Ok(DeleteOutcome::NotFound);
        }
        if !diary.owned_by(viewer) {
            return Ok(DeleteOutcome::Forbidden);
        }

        query("DELETE FROM diaries.diaries WHERE diary_snowflake = $1")
            .bind(diary_id.as_i64())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(DeleteOutcome::Deleted)
    }

    async fn fetch_book_by_isbn(
        &self,
        owner: Id<UserMarker>,
        isbn: &Isbn,
    ) -> Result<Option<Book>> {
        let record: Option<BookRecord> = query_as(concat!(
            "SELECT ",
            book_columns!(),
            " FROM shelf.books WHERE owner_snowflake = $1 AND isbn = $2"
        ))
        .bind(owner.as_i64())
        .bind(isbn.get())
        .fetch_optional(&self.pool)
        .await?;

        let book = record.map(Book::try_from).transpose()?;
        Ok(book)
    }

    async fn create_book(
        &self,
        owner: Id<UserMarker>,
        isbn: &Isbn,
        metadata: &BookMetadata,
        at: UtcDateTime,
    ) -> Result<Option<Book>> {
        let book_id: Id<BookMarker> = self.next_id();

        let record: Option<BookRecord> = query_as(concat!(
            "INSERT INTO shelf.books \
            (book_snowflake, owner_snowflake, isbn, title, authors, thumbnail, created_at) \
            VALUES ($1, $2, $3, $4, $5, $6, $7) \
            ON CONFLICT (owner_snowflake, isbn) DO NOTHING \
            RETURNING ",
            book_columns!()
        ))
        .bind(book_id.as_i64())
        .bind(owner.as_i64())
        .bind(isbn.get())
        .bind(&metadata.title)
        .bind(&metadata.authors)
        .bind(&metadata.thumbnail)
        .bind(to_primitive(at))
        .fetch_optional(&self.pool)
        .await?;

        let book = record.map(Book::try_from).transpose()?;
        Ok(book)
    }

    async fn fetch_book(
        &self,
        book_id: Id<BookMarker>,
        owner: Id<UserMarker>,
    ) -> Result<Option<Book>> {
        let record: Option<BookRecord> = query_as(concat!(
            "SELECT ",
            book_columns!(),
            " FROM shelf.books WHERE book_snowflake = $1 AND owner_snowflake = $2"
        ))
        .bind(book_id.as_i64())
        .bind(owner.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        let book = record.map(Book::try_from).transpose()?;
        Ok(book)
    }

    async fn fetch_books(&self, owner: Id<UserMarker>) -> Result<Vec<Book>> {
        let records: Vec<BookRecord> = query_as(concat!(
            "SELECT ",
            book_columns!(),
            " FROM shelf.books WHERE owner_snowflake = $1 \
            ORDER BY created_at DESC, book_snowflake DESC"
        ))
        .bind(owner.as_i64())
        .fetch_all(&self.pool)
        .await?;

        let books = records
            .into_iter()
            .map(Book::try_from)
            .collect::<Result<_, _>>()?;
        Ok(books)
    }

    async fn update_book(
        &self,
        book_id: Id<BookMarker>,
        owner: Id<UserMarker>,
        change: BookChange,
    ) -> Result<BookUpdate> {
        let mut tx = self.pool.begin().await?;

        let record: Option<BookRecord> = query_as(concat!(
            "SELECT ",
            book_columns!(),
            " FROM shelf.books WHERE book_snowflake = $1 AND owner_snowflake = $2 FOR UPDATE"
        ))
        .bind(book_id.as_i64())
        .bind(owner.as_i64())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut book) = record.map(Book::try_from).transpose()? else {
            return Ok(BookUpdate::NotFound);
        };
        if let Err(rejection) = change.apply(&mut book) {
            return Ok(BookUpdate::Rejected(rejection));
        }

        query(
            "
            UPDATE shelf.books
            SET reading_note = $2, review = $3, total_seconds = $4, today_seconds = $5,
                last_read_at = $6, is_reading = $7, finished_at = $8
            WHERE book_snowflake = $1
            ",
        )
        .bind(book_id.as_i64())
        .bind(&book.reading_note)
        .bind(&book.review)
        .bind(i64::try_from(book.reading.total_seconds).unwrap_or(i64::MAX))
        .bind(i64::try_from(book.reading.today_seconds).unwrap_or(i64::MAX))
        .bind(book.reading.last_read_at.map(to_primitive))
        .bind(book.status.is_reading())
        .bind(book.status.finished_at().map(to_primitive))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(BookUpdate::Updated(book))
    }
}
