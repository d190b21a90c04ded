use fukubun_common::model::{
    Id, ModelValidationError,
    auth::{Authentication, PasswordDigest},
    diary::{Diary, DiaryDate},
    post::{Comment, Post, PostBody, PostKind},
    shelf::{Book, BookMetadata, ReadingLog, ReadingStatus},
    user::{User, UserHandle},
};
use sqlx::FromRow;
use std::collections::BTreeSet;
use time::{Date, Duration, PrimitiveDateTime, UtcDateTime};

/// Timestamps are stored as UTC in `TIMESTAMP` columns.
pub(crate) fn to_primitive(at: UtcDateTime) -> PrimitiveDateTime {
    PrimitiveDateTime::new(at.date(), at.time())
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct UserRecord {
    pub user_snowflake: i64,
    pub handle: String,
    pub name: String,
    pub bio: String,
    pub icon: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct CredentialsRecord {
    #[sqlx(flatten)]
    pub user: UserRecord,
    pub password_digest: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct AuthenticationRecord {
    pub user_snowflake: i64,
    pub token_hash: Vec<u8>,
    pub created_at: PrimitiveDateTime,
    pub expires_after_seconds: Option<i64>,
}

/// A post row joined with its owner.
#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct PostRecord {
    pub post_snowflake: i64,
    pub kind: String,
    pub title: Option<String>,
    pub message: String,
    pub image: Option<String>,
    pub created_at: PrimitiveDateTime,
    #[sqlx(flatten)]
    pub owner: UserRecord,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct LikeRecord {
    pub post_snowflake: i64,
    pub handle: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct CommentRecord {
    pub comment_snowflake: i64,
    pub post_snowflake: i64,
    pub message: String,
    pub created_at: PrimitiveDateTime,
    #[sqlx(flatten)]
    pub author: UserRecord,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct ViewRecord {
    pub viewed_at: PrimitiveDateTime,
    #[sqlx(flatten)]
    pub post: PostRecord,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct ReviewRecord {
    pub rating: String,
    pub reviewed_at: PrimitiveDateTime,
    #[sqlx(flatten)]
    pub post: PostRecord,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct DiaryRecord {
    pub diary_snowflake: i64,
    pub owner_snowflake: i64,
    pub title: String,
    pub content: String,
    pub date: Date,
    pub is_public: bool,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct BookRecord {
    pub book_snowflake: i64,
    pub owner_snowflake: i64,
    pub isbn: String,
    pub title: String,
    pub authors: String,
    pub thumbnail: String,
    pub reading_note: String,
    pub review: String,
    pub total_seconds: i64,
    pub today_seconds: i64,
    pub last_read_at: Option<PrimitiveDateTime>,
    pub is_reading: bool,
    pub finished_at: Option<PrimitiveDateTime>,
    pub created_at: PrimitiveDateTime,
}

impl TryFrom<UserRecord> for User {
    type Error = ModelValidationError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_i64(value.user_snowflake),
            handle: UserHandle::new(value.handle)?,
            name: value.name,
            bio: value.bio,
            icon: value.icon,
        })
    }
}

impl TryFrom<CredentialsRecord> for (User, PasswordDigest) {
    type Error = ModelValidationError;

    fn try_from(value: CredentialsRecord) -> Result<Self, Self::Error> {
        Ok((
            value.user.try_into()?,
            PasswordDigest::from_stored(value.password_digest),
        ))
    }
}

impl TryFrom<AuthenticationRecord> for Authentication {
    type Error = ModelValidationError;

    fn try_from(value: AuthenticationRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: Id::from_i64(value.user_snowflake),
            token_hash: value.token_hash.into_boxed_slice().try_into()?,
            created_at: value.created_at.as_utc(),
            expires_after: value
                .expires_after_seconds
                .map(|seconds| Duration::seconds(seconds).try_into())
                .transpose()?,
        })
    }
}

/// Likes and comments are loaded separately and start out empty.
impl TryFrom<PostRecord> for Post {
    type Error = ModelValidationError;

    fn try_from(value: PostRecord) -> Result<Self, Self::Error> {
        let owner = User::try_from(value.owner)?;
        let body = match value.kind.parse::<PostKind>()? {
            PostKind::Timeline => PostBody::Timeline {
                author: owner.clone(),
            },
            PostKind::Anonymous => PostBody::Anonymous { title: value.title },
            PostKind::Novel => PostBody::Novel { title: value.title },
        };

        Ok(Self {
            id: Id::from_i64(value.post_snowflake),
            owner: owner.id,
            body,
            message: value.message,
            image: value.image,
            liked_users: BTreeSet::new(),
            comments: Vec::new(),
            created_at: value.created_at.as_utc(),
        })
    }
}

impl TryFrom<CommentRecord> for Comment {
    type Error = ModelValidationError;

    fn try_from(value: CommentRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_i64(value.comment_snowflake),
            author: value.author.try_into()?,
            message: value.message,
            created_at: value.created_at.as_utc(),
        })
    }
}

impl TryFrom<DiaryRecord> for Diary {
    type Error = ModelValidationError;

    fn try_from(value: DiaryRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_i64(value.diary_snowflake),
            owner: Id::from_i64(value.owner_snowflake),
            title: value.title,
            content: value.content,
            date: DiaryDate::new(value.date),
            is_public: value.is_public,
            created_at: value.created_at.as_utc(),
            updated_at: value.updated_at.as_utc(),
        })
    }
}

pub(crate) fn counter(value: i64) -> Result<u64, ModelValidationError> {
    u64::try_from(value).map_err(|_| ModelValidationError::NegativeCounter(value))
}

impl TryFrom<BookRecord> for Book {
    type Error = ModelValidationError;

    fn try_from(value: BookRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_i64(value.book_snowflake),
            owner: Id::from_i64(value.owner_snowflake),
            isbn: value.isbn.parse()?,
            metadata: BookMetadata {
                title: value.title,
                authors: value.authors,
                thumbnail: value.thumbnail,
            },
            reading_note: value.reading_note,
            review: value.review,
            reading: ReadingLog {
                total_seconds: counter(value.total_seconds)?,
                today_seconds: counter(value.today_seconds)?,
                last_read_at: value.last_read_at.map(PrimitiveDateTime::as_utc),
            },
            status: ReadingStatus::from_flags(
                value.is_reading,
                value.finished_at.map(PrimitiveDateTime::as_utc),
            )?,
            created_at: value.created_at.as_utc(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::record::{BookRecord, PostRecord, UserRecord, to_primitive};
    use fukubun_common::model::{
        ModelValidationError,
        post::{Post, PostBody},
        shelf::{Book, ReadingStatus},
    };
    use time::macros::{date, datetime, utc_datetime};

    fn owner() -> UserRecord {
        UserRecord {
            user_snowflake: 7,
            handle: "hanako".to_owned(),
            name: "Hanako".to_owned(),
            bio: String::new(),
            icon: "/images/default_icon.svg".to_owned(),
        }
    }

    fn post_record(kind: &str) -> PostRecord {
        PostRecord {
            post_snowflake: 1,
            kind: kind.to_owned(),
            title: Some("Night".to_owned()),
            message: "text".to_owned(),
            image: None,
            created_at: datetime!(2025-03-01 12:00),
            owner: owner(),
        }
    }

    fn book_record() -> BookRecord {
        BookRecord {
            book_snowflake: 3,
            owner_snowflake: 7,
            isbn: "9784101010014".to_owned(),
            title: "Kokoro".to_owned(),
            authors: "Natsume Soseki".to_owned(),
            thumbnail: String::new(),
            reading_note: String::new(),
            review: String::new(),
            total_seconds: 85,
            today_seconds: 10,
            last_read_at: Some(datetime!(2025-03-02 01:00)),
            is_reading: false,
            finished_at: None,
            created_at: datetime!(2025-03-01 12:00),
        }
    }

    #[test]
    fn post_kinds_map_to_bodies() {
        let timeline = Post::try_from(post_record("timeline")).unwrap();
        assert_eq!(timeline.author().map(|user| user.handle.get()), Some("hanako"));
        assert_eq!(timeline.title(), None);

        let anonymous = Post::try_from(post_record("anonymous")).unwrap();
        assert_eq!(
            anonymous.body,
            PostBody::Anonymous {
                title: Some("Night".to_owned())
            }
        );
        assert_eq!(anonymous.owner, 7.into());
        assert_eq!(anonymous.created_at, utc_datetime!(2025-03-01 12:00));

        assert!(matches!(
            Post::try_from(post_record("blog")),
            Err(ModelValidationError::PostKind(_))
        ));
    }

    #[test]
    fn book_flags_become_status() {
        let book = Book::try_from(book_record()).unwrap();
        assert_eq!(book.status, ReadingStatus::Idle);
        assert_eq!(book.reading.total_seconds, 85);

        let mut finished = book_record();
        finished.finished_at = Some(datetime!(2025-03-03 00:00));
        assert_eq!(
            Book::try_from(finished).unwrap().status.finished_at(),
            Some(utc_datetime!(2025-03-03 00:00))
        );

        let mut inconsistent = book_record();
        inconsistent.is_reading = true;
        inconsistent.finished_at = Some(datetime!(2025-03-03 00:00));
        assert!(Book::try_from(inconsistent).is_err());

        let mut negative = book_record();
        negative.today_seconds = -1;
        assert_eq!(
            Book::try_from(negative),
            Err(ModelValidationError::NegativeCounter(-1))
        );
    }

    #[test]
    fn primitive_round_trip_keeps_utc() {
        let at = utc_datetime!(2025-12-31 23:59:59);
        let stored = to_primitive(at);
        assert_eq!(stored.date(), date!(2025-12-31));
        assert_eq!(stored.as_utc(), at);
    }
}
