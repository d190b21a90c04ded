//! JSON view models handed to the client.
//!
//! Everything a page shows is shaped here: timestamps become relative time
//! strings and anonymous posts lose their author.

use crate::server::Settings;
use fukubun_common::{
    model::{
        Id,
        diary::{Diary, DiaryDate, DiaryMarker},
        post::{Comment, CommentMarker, Post, PostKind, PostMarker},
        shelf::{Book, BookMarker, Isbn},
        user::{FollowCounts, Rating, Review, User, UserHandle, ViewedPost, Viewer},
    },
    relative_time::relative_time,
};
use serde::Serialize;
use std::collections::BTreeSet;
use time::{UtcDateTime, UtcOffset};

/// Who is looking, and when.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct ViewContext {
    pub viewer: Viewer,
    pub now: UtcDateTime,
    pub offset: UtcOffset,
}

impl ViewContext {
    pub fn new(user: &User, settings: Settings) -> Self {
        Self {
            viewer: user.viewer(),
            now: UtcDateTime::now(),
            offset: settings.utc_offset,
        }
    }

    pub fn time(&self, at: UtcDateTime) -> String {
        relative_time(self.now, at, self.offset)
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct UserView {
    pub handle: UserHandle,
    pub name: String,
    pub icon: String,
}

impl From<&User> for UserView {
    fn from(value: &User) -> Self {
        Self {
            handle: value.handle.clone(),
            name: value.name.clone(),
            icon: value.icon.clone(),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct CommentView {
    pub id: Id<CommentMarker>,
    pub author: UserView,
    pub message: String,
    pub created_at: String,
    pub deletable: bool,
}

impl CommentView {
    pub fn new(comment: &Comment, context: &ViewContext) -> Self {
        Self {
            id: comment.id,
            author: (&comment.author).into(),
            message: comment.message.clone(),
            created_at: context.time(comment.created_at),
            deletable: comment.author.handle == context.viewer.handle,
        }
    }
}

fn comment_views(post: &Post, context: &ViewContext) -> Vec<CommentView> {
    post.comments
        .iter()
        .map(|comment| CommentView::new(comment, context))
        .collect()
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct TimelinePostView {
    pub id: Id<PostMarker>,
    pub author: Option<UserView>,
    pub message: String,
    pub image: Option<String>,
    pub likes: usize,
    pub is_liked: bool,
    pub already_commented: bool,
    pub comment_count: usize,
    pub deletable: bool,
    pub created_at: String,
}

impl TimelinePostView {
    pub fn new(post: &Post, context: &ViewContext) -> Self {
        Self {
            id: post.id,
            author: post.author().map(UserView::from),
            message: post.message.clone(),
            image: post.image.clone(),
            likes: post.likes(),
            is_liked: post.is_liked_by(&context.viewer.handle),
            already_commented: post.commented_by(&context.viewer.handle),
            comment_count: post.comments.len(),
            deletable: post.deletable_by(&context.viewer),
            created_at: context.time(post.created_at),
        }
    }
}

/// An anonymous or novel post. The author is never part of the view; the
/// viewer only learns whether the post is their own through `deletable`.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct AnonymousPostView {
    pub id: Id<PostMarker>,
    pub kind: PostKind,
    pub title: Option<String>,
    pub message: String,
    pub image: Option<String>,
    pub likes: usize,
    pub is_liked: bool,
    pub already_commented: bool,
    pub comment_count: usize,
    pub deletable: bool,
    pub is_saved: bool,
    pub created_at: String,
}

impl AnonymousPostView {
    pub fn new(post: &Post, context: &ViewContext, saved: &BTreeSet<Id<PostMarker>>) -> Self {
        Self {
            id: post.id,
            kind: post.kind(),
            title: post.title().map(str::to_owned),
            message: post.message.clone(),
            image: post.image.clone(),
            likes: post.likes(),
            is_liked: post.is_liked_by(&context.viewer.handle),
            already_commented: post.commented_by(&context.viewer.handle),
            comment_count: post.comments.len(),
            deletable: post.owner == context.viewer.id,
            is_saved: saved.contains(&post.id),
            created_at: context.time(post.created_at),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct TimelineDetailView {
    #[serde(flatten)]
    pub post: TimelinePostView,
    pub comments: Vec<CommentView>,
}

impl TimelineDetailView {
    pub fn new(post: &Post, context: &ViewContext) -> Self {
        Self {
            post: TimelinePostView::new(post, context),
            comments: comment_views(post, context),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct AnonymousDetailView {
    #[serde(flatten)]
    pub post: AnonymousPostView,
    pub comments: Vec<CommentView>,
}

impl AnonymousDetailView {
    pub fn new(post: &Post, context: &ViewContext, saved: &BTreeSet<Id<PostMarker>>) -> Self {
        Self {
            post: AnonymousPostView::new(post, context, saved),
            comments: comment_views(post, context),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct ViewedPostView {
    pub post: AnonymousPostView,
    pub viewed_at: String,
}

impl ViewedPostView {
    pub fn new(
        viewed: &ViewedPost<Post>,
        context: &ViewContext,
        saved: &BTreeSet<Id<PostMarker>>,
    ) -> Self {
        Self {
            post: AnonymousPostView::new(&viewed.post, context, saved),
            viewed_at: context.time(viewed.viewed_at),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct ReviewView {
    pub post: AnonymousPostView,
    pub rating: Rating,
    pub reviewed_at: String,
}

impl ReviewView {
    pub fn new(
        review: &Review<Post>,
        context: &ViewContext,
        saved: &BTreeSet<Id<PostMarker>>,
    ) -> Self {
        Self {
            post: AnonymousPostView::new(&review.post, context, saved),
            rating: review.rating,
            reviewed_at: context.time(review.reviewed_at),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct ProfileView {
    pub handle: UserHandle,
    pub name: String,
    pub bio: String,
    pub icon: String,
    pub is_me: bool,
    /// Absent on the viewer's own profile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_following: Option<bool>,
    #[serde(flatten)]
    pub follow_counts: FollowCounts,
    pub posts: Vec<TimelinePostView>,
}

impl ProfileView {
    pub fn new(
        user: &User,
        follow_counts: FollowCounts,
        is_following: Option<bool>,
        posts: &[Post],
        context: &ViewContext,
    ) -> Self {
        Self {
            handle: user.handle.clone(),
            name: user.name.clone(),
            bio: user.bio.clone(),
            icon: user.icon.clone(),
            is_me: user.id == context.viewer.id,
            is_following,
            follow_counts,
            posts: posts
                .iter()
                .map(|post| TimelinePostView::new(post, context))
                .collect(),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct DiaryView {
    pub id: Id<DiaryMarker>,
    pub title: String,
    pub content: String,
    pub date: DiaryDate,
    pub is_public: bool,
    pub is_mine: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl DiaryView {
    pub fn new(diary: &Diary, context: &ViewContext) -> Self {
        Self {
            id: diary.id,
            title: diary.title.clone(),
            content: diary.content.clone(),
            date: diary.date,
            is_public: diary.is_public,
            is_mine: diary.owned_by(&context.viewer),
            created_at: context.time(diary.created_at),
            updated_at: context.time(diary.updated_at),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingState {
    Idle,
    Reading,
    Finished,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct BookView {
    pub id: Id<BookMarker>,
    pub isbn: Isbn,
    pub title: String,
    pub authors: String,
    pub thumbnail: String,
    pub reading_note: String,
    pub review: String,
    pub total_seconds: u64,
    /// Seconds read on the viewer's current local day.
    pub today_seconds: u64,
    pub last_read_at: Option<String>,
    pub state: ReadingState,
    pub finished_at: Option<String>,
    pub created_at: String,
}

impl BookView {
    pub fn new(book: &Book, context: &ViewContext) -> Self {
        let state = match book.status.finished_at() {
            Some(_) => ReadingState::Finished,
            None if book.status.is_reading() => ReadingState::Reading,
            None => ReadingState::Idle,
        };

        Self {
            id: book.id,
            isbn: book.isbn.clone(),
            title: book.metadata.title.clone(),
            authors: book.metadata.authors.clone(),
            thumbnail: book.metadata.thumbnail.clone(),
            reading_note: book.reading_note.clone(),
            review: book.review.clone(),
            total_seconds: book.reading.total_seconds,
            today_seconds: book.reading.read_on(context.now, context.offset),
            last_read_at: book.reading.last_read_at.map(|at| context.time(at)),
            state,
            finished_at: book.status.finished_at().map(|at| context.time(at)),
            created_at: context.time(book.created_at),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct ShelfOverview {
    pub reading: Vec<BookView>,
    pub recent: Vec<BookView>,
}

#[cfg(test)]
mod tests {
    use crate::server::views::{
        AnonymousPostView, BookView, ReadingState, TimelinePostView, ViewContext,
    };
    use fukubun_common::model::{
        Id,
        post::{CreatePost, Post, PostKind},
        shelf::{Book, BookMetadata, ReadingLog, ReadingStatus},
        user::{User, UserHandle},
    };
    use std::collections::BTreeSet;
    use time::macros::{offset, utc_datetime};

    fn user(id: u64, handle: &str) -> User {
        User {
            id: Id::from(id),
            handle: UserHandle::new(handle.to_owned()).unwrap(),
            name: handle.to_owned(),
            ..User::default()
        }
    }

    fn context(user: &User) -> ViewContext {
        ViewContext {
            viewer: user.viewer(),
            now: utc_datetime!(2025-03-10 12:00),
            offset: offset!(+9),
        }
    }

    fn post(owner: &User, kind: PostKind) -> Post {
        let create = CreatePost {
            title: Some("Title".to_owned()),
            message: "hello".to_owned(),
            image: None,
        };
        Post::new(Id::from(10), owner, kind, &create, utc_datetime!(2025-03-10 11:58))
    }

    #[test]
    fn anonymous_view_masks_author() {
        let owner = user(1, "owner");
        let other = user(2, "other");
        let post = post(&owner, PostKind::Anonymous);
        let saved = BTreeSet::from([post.id]);

        let own = AnonymousPostView::new(&post, &context(&owner), &saved);
        assert!(own.deletable);
        assert!(own.is_saved);
        assert_eq!(own.created_at, "2 minutes ago");

        let foreign = AnonymousPostView::new(&post, &context(&other), &BTreeSet::new());
        assert!(!foreign.deletable);
        assert!(!foreign.is_saved);

        let json = serde_json::to_value(&foreign).unwrap();
        assert!(json.get("author").is_none());
        assert!(json.get("owner").is_none());
        assert!(!json.to_string().contains("owner"));
    }

    #[test]
    fn timeline_view_reports_viewer_state() {
        let author = user(1, "author");
        let reader = user(2, "reader");
        let mut post = post(&author, PostKind::Timeline);
        post.toggle_like(&reader.handle);

        let view = TimelinePostView::new(&post, &context(&reader));
        assert_eq!(view.likes, 1);
        assert!(view.is_liked);
        assert!(!view.deletable);
        assert_eq!(view.author.map(|author| author.name), Some("author".to_owned()));

        assert!(TimelinePostView::new(&post, &context(&author)).deletable);
    }

    #[test]
    fn book_view_shows_todays_seconds_only() {
        let owner = user(1, "owner");
        let mut book = Book {
            id: Id::from(3),
            owner: owner.id,
            isbn: "9784101010014".parse().unwrap(),
            metadata: BookMetadata::default(),
            reading_note: String::new(),
            review: String::new(),
            reading: ReadingLog {
                total_seconds: 120,
                today_seconds: 60,
                // 2025-03-09 in +09:00.
                last_read_at: Some(utc_datetime!(2025-03-09 10:00)),
            },
            status: ReadingStatus::Reading,
            created_at: utc_datetime!(2025-03-01 00:00),
        };

        let view = BookView::new(&book, &context(&owner));
        assert_eq!(view.total_seconds, 120);
        assert_eq!(view.today_seconds, 0);
        assert_eq!(view.state, ReadingState::Reading);

        book.reading.last_read_at = Some(utc_datetime!(2025-03-10 11:00));
        assert_eq!(BookView::new(&book, &context(&owner)).today_seconds, 60);
    }
}
