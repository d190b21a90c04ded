use crate::store::{Result, Store};
use async_trait::async_trait;
use fukubun_common::{
    model::{
        FukubunSnowflakeGenerator, Id,
        auth::{AuthTokenHash, Authentication, PasswordDigest},
        diary::{Diary, DiaryDate, DiaryEntry, DiaryMarker, DiaryWrite},
        post::{
            Comment, CommentMarker, CommentOutcome, CreatePost, DeleteOutcome, LikeToggle, Post,
            PostBody, PostKind, PostMarker,
        },
        shelf::{
            Book, BookChange, BookMarker, BookMetadata, BookUpdate, Isbn, ReadingLog, ReadingStatus,
        },
        user::{
            CreateUser, DEFAULT_ICON, FollowCounts, ProfileUpdate, Rating, Review, User,
            UserHandle, UserMarker, ViewedPost, Viewer, upsert_review,
        },
    },
    snowflake::{ProcessId, WorkerId},
};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet, HashMap},
};
use time::UtcDateTime;

struct StoredUser {
    user: User,
    password: PasswordDigest,
    following: BTreeSet<Id<UserMarker>>,
    saved_posts: BTreeSet<Id<PostMarker>>,
    viewed_posts: Vec<ViewedPost<Id<PostMarker>>>,
    reviews: Vec<Review<Id<PostMarker>>>,
}

struct State {
    snowflake_generator: FukubunSnowflakeGenerator,
    users: BTreeMap<Id<UserMarker>, StoredUser>,
    authentications: HashMap<AuthTokenHash, Authentication>,
    posts: BTreeMap<Id<PostMarker>, Post>,
    diaries: BTreeMap<Id<DiaryMarker>, Diary>,
    books: BTreeMap<Id<BookMarker>, Book>,
}

impl State {
    fn next_id<Marker>(&mut self) -> Id<Marker> {
        self.snowflake_generator.generate().into()
    }

    fn posts_newest_first(&self, keep: impl Fn(&Post) -> bool) -> Vec<Post> {
        let mut posts: Vec<Post> = self.posts.values().filter(|post| keep(post)).cloned().collect();
        posts.sort_by_key(|post| Reverse((post.created_at, post.id)));
        posts
    }

    /// Keeps the author copies inside posts and comments in sync with the profile.
    fn refresh_author(&mut self, user: &User) {
        for post in self.posts.values_mut() {
            if let PostBody::Timeline { author } = &mut post.body
                && author.id == user.id
            {
                *author = user.clone();
            }
            for comment in &mut post.comments {
                if comment.author.id == user.id {
                    comment.author = user.clone();
                }
            }
        }
    }

    fn forget_post(&mut self, post_id: Id<PostMarker>) {
        self.posts.remove(&post_id);
        for stored in self.users.values_mut() {
            stored.saved_posts.remove(&post_id);
            stored.viewed_posts.retain(|view| view.post != post_id);
            stored.reviews.retain(|review| review.post != post_id);
        }
    }
}

/// In-process store for local development and tests.
///
/// Every operation runs under a single lock acquisition.
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(worker_id: WorkerId, process_id: ProcessId) -> Self {
        let state = State {
            snowflake_generator: FukubunSnowflakeGenerator::new(worker_id, process_id),
            users: BTreeMap::new(),
            authentications: HashMap::new(),
            posts: BTreeMap::new(),
            diaries: BTreeMap::new(),
            books: BTreeMap::new(),
        };

        Self {
            state: Mutex::new(state),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(WorkerId::new_unchecked(0), ProcessId::new_unchecked(0))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, user: &CreateUser) -> Result<Option<User>> {
        let mut state = self.state.lock();
        if state
            .users
            .values()
            .any(|stored| stored.user.handle == user.handle)
        {
            return Ok(None);
        }

        let created = User {
            id: state.next_id(),
            handle: user.handle.clone(),
            name: user.name.clone(),
            bio: String::new(),
            icon: DEFAULT_ICON.to_owned(),
        };
        state.users.insert(
            created.id,
            StoredUser {
                user: created.clone(),
                password: user.password.clone(),
                following: BTreeSet::new(),
                saved_posts: BTreeSet::new(),
                viewed_posts: Vec::new(),
                reviews: Vec::new(),
            },
        );

        Ok(Some(created))
    }

    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        let state = self.state.lock();
        Ok(state.users.get(&user_id).map(|stored| stored.user.clone()))
    }

    async fn fetch_user_by_handle(&self, handle: &UserHandle) -> Result<Option<User>> {
        let state = self.state.lock();
        let user = state
            .users
            .values()
            .find(|stored| &stored.user.handle == handle)
            .map(|stored| stored.user.clone());
        Ok(user)
    }

    async fn fetch_credentials(
        &self,
        handle: &UserHandle,
    ) -> Result<Option<(User, PasswordDigest)>> {
        let state = self.state.lock();
        let credentials = state
            .users
            .values()
            .find(|stored| &stored.user.handle == handle)
            .map(|stored| (stored.user.clone(), stored.password.clone()));
        Ok(credentials)
    }

    async fn update_profile(
        &self,
        user_id: Id<UserMarker>,
        update: &ProfileUpdate,
    ) -> Result<Option<User>> {
        let mut state = self.state.lock();
        let Some(stored) = state.users.get_mut(&user_id) else {
            return Ok(None);
        };

        stored.user.name.clone_from(&update.name);
        stored.user.bio.clone_from(&update.bio);
        if let Some(icon) = update.icon_change() {
            icon.clone_into(&mut stored.user.icon);
        }
        let user = stored.user.clone();
        state.refresh_author(&user);

        Ok(Some(user))
    }

    async fn follow(&self, follower: Id<UserMarker>, followee: Id<UserMarker>) -> Result<()> {
        let mut state = self.state.lock();
        if follower != followee
            && state.users.contains_key(&followee)
            && let Some(stored) = state.users.get_mut(&follower)
        {
            stored.following.insert(followee);
        }
        Ok(())
    }

    async fn unfollow(&self, follower: Id<UserMarker>, followee: Id<UserMarker>) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(stored) = state.users.get_mut(&follower) {
            stored.following.remove(&followee);
        }
        Ok(())
    }

    async fn is_following(
        &self,
        follower: Id<UserMarker>,
        followee: Id<UserMarker>,
    ) -> Result<bool> {
        let state = self.state.lock();
        let following = state
            .users
            .get(&follower)
            .is_some_and(|stored| stored.following.contains(&followee));
        Ok(following)
    }

    async fn fetch_follow_counts(&self, user_id: Id<UserMarker>) -> Result<FollowCounts> {
        let state = self.state.lock();
        let following = state
            .users
            .get(&user_id)
            .map_or(0, |stored| stored.following.len());
        let followers = state
            .users
            .values()
            .filter(|stored| stored.following.contains(&user_id))
            .count();

        Ok(FollowCounts {
            following: following as u64,
            followers: followers as u64,
        })
    }

    async fn create_auth(&self, authentication: &Authentication) -> Result<()> {
        let mut state = self.state.lock();
        state
            .authentications
            .insert(authentication.token_hash.clone(), authentication.clone());
        Ok(())
    }

    async fn fetch_auth(&self, token_hash: &AuthTokenHash) -> Result<Option<Authentication>> {
        let state = self.state.lock();
        Ok(state.authentications.get(token_hash).cloned())
    }

    async fn delete_auth(&self, token_hash: &AuthTokenHash) -> Result<()> {
        let mut state = self.state.lock();
        state.authentications.remove(token_hash);
        Ok(())
    }

    async fn create_post(
        &self,
        owner: &User,
        kind: PostKind,
        post: &CreatePost,
        at: UtcDateTime,
    ) -> Result<Post> {
        let mut state = self.state.lock();
        let post = Post::new(state.next_id(), owner, kind, post, at);
        state.posts.insert(post.id, post.clone());
        Ok(post)
    }

    async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let state = self.state.lock();
        Ok(state.posts.get(&post_id).cloned())
    }

    async fn fetch_posts(&self, kind: PostKind) -> Result<Vec<Post>> {
        let state = self.state.lock();
        Ok(state.posts_newest_first(|post| post.kind() == kind))
    }

    async fn fetch_user_posts(&self, owner: Id<UserMarker>) -> Result<Vec<Post>> {
        let state = self.state.lock();
        Ok(state.posts_newest_first(|post| {
            post.kind() == PostKind::Timeline && post.owner == owner
        }))
    }

    async fn sample_posts(&self, kind: PostKind) -> Result<Vec<Post>> {
        let mut posts: Vec<Post> = {
            let state = self.state.lock();
            state
                .posts
                .values()
                .filter(|post| post.kind() == kind)
                .cloned()
                .collect()
        };
        posts.shuffle(&mut rand::rng());
        Ok(posts)
    }

    async fn delete_post(
        &self,
        post_id: Id<PostMarker>,
        kind: PostKind,
        viewer: &Viewer,
    ) -> Result<DeleteOutcome> {
        let mut state = self.state.lock();
        let Some(post) = state.posts.get(&post_id).filter(|post| post.kind() == kind) else {
            return Ok(DeleteOutcome::NotFound);
        };
        if !post.deletable_by(viewer) {
            return Ok(DeleteOutcome::Forbidden);
        }

        state.forget_post(post_id);
        Ok(DeleteOutcome::Deleted)
    }

    async fn toggle_like(
        &self,
        post_id: Id<PostMarker>,
        handle: &UserHandle,
    ) -> Result<Option<LikeToggle>> {
        let mut state = self.state.lock();
        let toggle = state
            .posts
            .get_mut(&post_id)
            .map(|post| post.toggle_like(handle));
        Ok(toggle)
    }

    async fn add_comment(
        &self,
        post_id: Id<PostMarker>,
        author: &User,
        message: &str,
        at: UtcDateTime,
    ) -> Result<CommentOutcome> {
        let mut state = self.state.lock();
        let comment_id = state.next_id();
        let Some(post) = state.posts.get_mut(&post_id) else {
            return Ok(CommentOutcome::PostNotFound);
        };

        let message = match post.check_comment(&author.viewer(), message) {
            Ok(message) => message,
            Err(rejection) => return Ok(CommentOutcome::Rejected(rejection)),
        };
        let comment = Comment {
            id: comment_id,
            author: author.clone(),
            message: message.to_owned(),
            created_at: at,
        };
        post.comments.push(comment.clone());

        Ok(CommentOutcome::Added(comment))
    }

    async fn delete_comment(
        &self,
        post_id: Id<PostMarker>,
        comment_id: Id<CommentMarker>,
        viewer: &Viewer,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        let removed = state
            .posts
            .get_mut(&post_id)
            .is_some_and(|post| post.remove_comment(comment_id, viewer));
        Ok(removed)
    }

    async fn save_post(&self, user_id: Id<UserMarker>, post_id: Id<PostMarker>) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.posts.contains_key(&post_id) {
            return Ok(false);
        }
        if let Some(stored) = state.users.get_mut(&user_id) {
            stored.saved_posts.insert(post_id);
        }
        Ok(true)
    }

    async fn unsave_post(&self, user_id: Id<UserMarker>, post_id: Id<PostMarker>) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(stored) = state.users.get_mut(&user_id) {
            stored.saved_posts.remove(&post_id);
        }
        Ok(())
    }

    async fn fetch_saved_post_ids(
        &self,
        user_id: Id<UserMarker>,
    ) -> Result<BTreeSet<Id<PostMarker>>> {
        let state = self.state.lock();
        let saved = state
            .users
            .get(&user_id)
            .map(|stored| stored.saved_posts.clone())
            .unwrap_or_default();
        Ok(saved)
    }

    async fn fetch_saved_posts(&self, user_id: Id<UserMarker>) -> Result<Vec<Post>> {
        let state = self.state.lock();
        let Some(stored) = state.users.get(&user_id) else {
            return Ok(Vec::new());
        };
        Ok(state.posts_newest_first(|post| stored.saved_posts.contains(&post.id)))
    }

    async fn record_view(
        &self,
        user_id: Id<UserMarker>,
        post_id: Id<PostMarker>,
        at: UtcDateTime,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if !state.posts.contains_key(&post_id) {
            return Ok(());
        }
        if let Some(stored) = state.users.get_mut(&user_id) {
            stored.viewed_posts.push(ViewedPost {
                post: post_id,
                viewed_at: at,
            });
        }
        Ok(())
    }

    async fn fetch_view_log(&self, user_id: Id<UserMarker>) -> Result<Vec<ViewedPost<Post>>> {
        let state = self.state.lock();
        let Some(stored) = state.users.get(&user_id) else {
            return Ok(Vec::new());
        };

        let mut log: Vec<ViewedPost<Post>> = stored
            .viewed_posts
            .iter()
            .rev()
            .filter_map(|view| {
                let post = state.posts.get(&view.post)?.clone();
                Some(ViewedPost {
                    post,
                    viewed_at: view.viewed_at,
                })
            })
            .collect();
        log.sort_by_key(|view| Reverse(view.viewed_at));
        Ok(log)
    }

    async fn remove_view(
        &self,
        user_id: Id<UserMarker>,
        post_id: Id<PostMarker>,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(stored) = state.users.get_mut(&user_id) else {
            return Ok(false);
        };

        let earliest = stored
            .viewed_posts
            .iter()
            .enumerate()
            .filter(|(_, view)| view.post == post_id)
            .min_by_key(|(_, view)| view.viewed_at)
            .map(|(position, _)| position);

        match earliest {
            Some(position) => {
                stored.viewed_posts.remove(position);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear_view_log(&self, user_id: Id<UserMarker>) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(stored) = state.users.get_mut(&user_id) {
            stored.viewed_posts.clear();
        }
        Ok(())
    }

    async fn upsert_review(
        &self,
        user_id: Id<UserMarker>,
        post_id: Id<PostMarker>,
        rating: Rating,
        at: UtcDateTime,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.posts.contains_key(&post_id) {
            return Ok(false);
        }
        if let Some(stored) = state.users.get_mut(&user_id) {
            upsert_review(&mut stored.reviews, post_id, rating, at);
        }
        Ok(true)
    }

    async fn fetch_reviews(&self, user_id: Id<UserMarker>) -> Result<Vec<Review<Post>>> {
        let state = self.state.lock();
        let Some(stored) = state.users.get(&user_id) else {
            return Ok(Vec::new());
        };

        let mut reviews: Vec<Review<Post>> = stored
            .reviews
            .iter()
            .filter_map(|review| {
                let post = state.posts.get(&review.post)?.clone();
                Some(Review {
                    post,
                    rating: review.rating,
                    reviewed_at: review.reviewed_at,
                })
            })
            .collect();
        reviews.sort_by_key(|review| Reverse(review.reviewed_at));
        Ok(reviews)
    }

    async fn create_diary(
        &self,
        owner: Id<UserMarker>,
        entry: &DiaryEntry,
        at: UtcDateTime,
    ) -> Result<DiaryWrite> {
        let mut state = self.state.lock();
        if state
            .diaries
            .values()
            .any(|diary| diary.owner == owner && diary.date == entry.date)
        {
            return Ok(DiaryWrite::DateTaken);
        }

        let diary = Diary {
            id: state.next_id(),
            owner,
            title: entry.title.clone(),
            content: entry.content.clone(),
            date: entry.date,
            is_public: entry.is_public,
            created_at: at,
            updated_at: at,
        };
        state.diaries.insert(diary.id, diary.clone());

        Ok(DiaryWrite::Written(diary))
    }

    async fn fetch_diary(&self, diary_id: Id<DiaryMarker>) -> Result<Option<Diary>> {
        let state = self.state.lock();
        Ok(state.diaries.get(&diary_id).cloned())
    }

    async fn fetch_visible_diaries(
        &self,
        viewer: &Viewer,
        date: Option<DiaryDate>,
    ) -> Result<Vec<Diary>> {
        let state = self.state.lock();
        let mut diaries: Vec<Diary> = state
            .diaries
            .values()
            .filter(|diary| diary.visible_to(viewer))
            .filter(|diary| date.is_none_or(|date| diary.date == date))
            .cloned()
            .collect();
        diaries.sort_by_key(|diary| Reverse((diary.date, diary.created_at)));
        Ok(diaries)
    }

    async fn fetch_public_diary_counts(&self) -> Result<BTreeMap<DiaryDate, u64>> {
        let state = self.state.lock();
        let mut counts = BTreeMap::new();
        for diary in state.diaries.values().filter(|diary| diary.is_public) {
            *counts.entry(diary.date).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn fetch_user_diaries(&self, owner: Id<UserMarker>) -> Result<Vec<Diary>> {
        let state = self.state.lock();
        let mut diaries: Vec<Diary> = state
            .diaries
            .values()
            .filter(|diary| diary.owner == owner)
            .cloned()
            .collect();
        diaries.sort_by_key(|diary| diary.date);
        Ok(diaries)
    }

    async fn update_diary(
        &self,
        diary_id: Id<DiaryMarker>,
        viewer: &Viewer,
        entry: &DiaryEntry,
        at: UtcDateTime,
    ) -> Result<DiaryWrite> {
        let mut state = self.state.lock();
        let Some(current) = state.diaries.get(&diary_id) else {
            return Ok(DiaryWrite::NotFound);
        };
        if !current.visible_to(viewer) {
            return Ok(DiaryWrite::NotFound);
        }
        if !current.owned_by(viewer) {
            return Ok(DiaryWrite::Forbidden);
        }

        let owner = current.owner;
        if state.diaries.values().any(|diary| {
            diary.id != diary_id && diary.owner == owner && diary.date == entry.date
        }) {
            return Ok(DiaryWrite::DateTaken);
        }

        let Some(diary) = state.diaries.get_mut(&diary_id) else {
            return Ok(DiaryWrite::NotFound);
        };
        diary.title.clone_from(&entry.title);
        diary.content.clone_from(&entry.content);
        diary.date = entry.date;
        diary.is_public = entry.is_public;
        diary.updated_at = at;

        Ok(DiaryWrite::Written(diary.clone()))
    }

    async fn delete_diary(
        &self,
        diary_id: Id<DiaryMarker>,
        viewer: &Viewer,
    ) -> Result<DeleteOutcome> {
        let mut state = self.state.lock();
        let outcome = match state.diaries.get(&diary_id) {
            Some(diary) if diary.owned_by(viewer) => DeleteOutcome::Deleted,
            Some(diary) if diary.visible_to(viewer) => DeleteOutcome::Forbidden,
            Some(_) | None => DeleteOutcome::NotFound,
        };
        if outcome == DeleteOutcome::Deleted {
            state.diaries.remove(&diary_id);
        }
        Ok(outcome)
    }

    async fn fetch_book_by_isbn(
        &self,
        owner: Id<UserMarker>,
        isbn: &Isbn,
    ) -> Result<Option<Book>> {
        let state = self.state.lock();
        let book = state
            .books
            .values()
            .find(|book| book.owner == owner && &book.isbn == isbn)
            .cloned();
        Ok(book)
    }

    async fn create_book(
        &self,
        owner: Id<UserMarker>,
        isbn: &Isbn,
        metadata: &BookMetadata,
        at: UtcDateTime,
    ) -> Result<Option<Book>> {
        let mut state = self.state.lock();
        if state
            .books
            .values()
            .any(|book| book.owner == owner && &book.isbn == isbn)
        {
            return Ok(None);
        }

        let book = Book {
            id: state.next_id(),
            owner,
            isbn: isbn.clone(),
            metadata: metadata.clone(),
            reading_note: String::new(),
            review: String::new(),
            reading: ReadingLog::default(),
            status: ReadingStatus::Idle,
            created_at: at,
        };
        state.books.insert(book.id, book.clone());

        Ok(Some(book))
    }

    async fn fetch_book(
        &self,
        book_id: Id<BookMarker>,
        owner: Id<UserMarker>,
    ) -> Result<Option<Book>> {
        let state = self.state.lock();
        let book = state
            .books
            .get(&book_id)
            .filter(|book| book.owner == owner)
            .cloned();
        Ok(book)
    }

    async fn fetch_books(&self, owner: Id<UserMarker>) -> Result<Vec<Book>> {
        let state = self.state.lock();
        let mut books: Vec<Book> = state
            .books
            .values()
            .filter(|book| book.owner == owner)
            .cloned()
            .collect();
        books.sort_by_key(|book| Reverse((book.created_at, book.id)));
        Ok(books)
    }

    async fn update_book(
        &self,
        book_id: Id<BookMarker>,
        owner: Id<UserMarker>,
        change: BookChange,
    ) -> Result<BookUpdate> {
        let mut state = self.state.lock();
        let Some(stored) = state
            .books
            .get_mut(&book_id)
            .filter(|book| book.owner == owner)
        else {
            return Ok(BookUpdate::NotFound);
        };

        let mut book = stored.clone();
        if let Err(rejection) = change.apply(&mut book) {
            return Ok(BookUpdate::Rejected(rejection));
        }
        stored.clone_from(&book);

        Ok(BookUpdate::Updated(book))
    }
}
