use crate::model::{
    Id,
    user::{User, UserHandle, UserMarker, Viewer},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, str::FromStr};
use thiserror::Error;
use time::UtcDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct CommentMarker;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PostKind {
    Timeline,
    Anonymous,
    Novel,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Unknown post kind: {0}")]
pub struct InvalidPostKindError(String);

impl PostKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PostKind::Timeline => "timeline",
            PostKind::Anonymous => "anonymous",
            PostKind::Novel => "novel",
        }
    }

    /// Anonymous and novel posts never reveal who wrote them.
    #[must_use]
    pub fn hides_author(self) -> bool {
        !matches!(self, PostKind::Timeline)
    }
}

impl FromStr for PostKind {
    type Err = InvalidPostKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeline" => Ok(PostKind::Timeline),
            "anonymous" => Ok(PostKind::Anonymous),
            "novel" => Ok(PostKind::Novel),
            other => Err(InvalidPostKindError(other.to_owned())),
        }
    }
}

/// Kind-specific part of a post.
///
/// Only timeline posts carry an author; the other kinds keep their creator
/// solely in [`Post::owner`].
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum PostBody {
    Timeline { author: User },
    Anonymous { title: Option<String> },
    Novel { title: Option<String> },
}

impl PostBody {
    #[must_use]
    pub fn kind(&self) -> PostKind {
        match self {
            PostBody::Timeline { .. } => PostKind::Timeline,
            PostBody::Anonymous { .. } => PostKind::Anonymous,
            PostBody::Novel { .. } => PostKind::Novel,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Post {
    pub id: Id<PostMarker>,
    pub owner: Id<UserMarker>,
    pub body: PostBody,
    pub message: String,
    pub image: Option<String>,
    pub liked_users: BTreeSet<UserHandle>,
    pub comments: Vec<Comment>,
    pub created_at: UtcDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Comment {
    pub id: Id<CommentMarker>,
    pub author: User,
    pub message: String,
    pub created_at: UtcDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
pub struct CreatePost {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub image: Option<String>,
}

impl CreatePost {
    /// Title to store; blank titles are dropped and timeline posts have none.
    #[must_use]
    pub fn title_for(&self, kind: PostKind) -> Option<&str> {
        match kind {
            PostKind::Timeline => None,
            PostKind::Anonymous | PostKind::Novel => self
                .title
                .as_deref()
                .map(str::trim)
                .filter(|title| !title.is_empty()),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
pub struct LikeToggle {
    pub likes: usize,
    pub is_liked: bool,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
pub enum CommentRejection {
    #[error("Comment is empty")]
    Empty,
    #[error("You have already commented on this post")]
    AlreadyCommented,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum CommentOutcome {
    Added(Comment),
    Rejected(CommentRejection),
    PostNotFound,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    Forbidden,
}

/// Strips leading whitespace only and rejects what is left if empty.
pub fn comment_message(message: &str) -> Result<&str, CommentRejection> {
    let message = message.trim_start();
    if message.is_empty() {
        Err(CommentRejection::Empty)
    } else {
        Ok(message)
    }
}

impl Post {
    /// A freshly created post with no likes and no comments.
    #[must_use]
    pub fn new(
        id: Id<PostMarker>,
        owner: &User,
        kind: PostKind,
        create: &CreatePost,
        created_at: UtcDateTime,
    ) -> Self {
        let title = create.title_for(kind).map(str::to_owned);
        let body = match kind {
            PostKind::Timeline => PostBody::Timeline {
                author: owner.clone(),
            },
            PostKind::Anonymous => PostBody::Anonymous { title },
            PostKind::Novel => PostBody::Novel { title },
        };

        Self {
            id,
            owner: owner.id,
            body,
            message: create.message.clone(),
            image: create.image.clone().filter(|image| !image.is_empty()),
            liked_users: BTreeSet::new(),
            comments: Vec::new(),
            created_at,
        }
    }

    #[must_use]
    pub fn kind(&self) -> PostKind {
        self.body.kind()
    }

    #[must_use]
    pub fn author(&self) -> Option<&User> {
        match &self.body {
            PostBody::Timeline { author } => Some(author),
            PostBody::Anonymous { .. } | PostBody::Novel { .. } => None,
        }
    }

    #[must_use]
    pub fn title(&self) -> Option<&str> {
        match &self.body {
            PostBody::Timeline { .. } => None,
            PostBody::Anonymous { title } | PostBody::Novel { title } => title.as_deref(),
        }
    }

    /// Like count, always derived from the set of users who liked the post.
    #[must_use]
    pub fn likes(&self) -> usize {
        self.liked_users.len()
    }

    #[must_use]
    pub fn is_liked_by(&self, handle: &UserHandle) -> bool {
        self.liked_users.contains(handle)
    }

    pub fn toggle_like(&mut self, handle: &UserHandle) -> LikeToggle {
        let is_liked = if self.liked_users.remove(handle) {
            false
        } else {
            self.liked_users.insert(handle.clone());
            true
        };

        LikeToggle {
            likes: self.likes(),
            is_liked,
        }
    }

    #[must_use]
    pub fn commented_by(&self, handle: &UserHandle) -> bool {
        self.comments
            .iter()
            .any(|comment| &comment.author.handle == handle)
    }

    /// Validates a comment submission and returns the message to store.
    pub fn check_comment<'m>(
        &self,
        viewer: &Viewer,
        message: &'m str,
    ) -> Result<&'m str, CommentRejection> {
        let message = comment_message(message)?;
        if self.commented_by(&viewer.handle) {
            return Err(CommentRejection::AlreadyCommented);
        }

        Ok(message)
    }

    /// Removes a comment if `viewer` wrote it.
    pub fn remove_comment(&mut self, comment_id: Id<CommentMarker>, viewer: &Viewer) -> bool {
        let before = self.comments.len();
        self.comments.retain(|comment| {
            comment.id != comment_id || comment.author.handle != viewer.handle
        });
        self.comments.len() != before
    }

    #[must_use]
    pub fn deletable_by(&self, viewer: &Viewer) -> bool {
        match &self.body {
            PostBody::Timeline { author } => {
                author.handle == viewer.handle && self.owner == viewer.id
            }
            PostBody::Anonymous { .. } | PostBody::Novel { .. } => self.owner == viewer.id,
        }
    }
}
