use crate::model::{Id, auth::PasswordDigest};
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use std::{fmt::Display, str::FromStr};
use thiserror::Error;
use time::UtcDateTime;

pub const USER_HANDLE_MAX_LEN: usize = 50;
pub const DEFAULT_ICON: &str = "/images/default_icon.svg";

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct UserMarker;

/// Marks one entry of a user's view history.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct ViewMarker;

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
pub struct User {
    pub id: Id<UserMarker>,
    pub handle: UserHandle,
    pub name: String,
    pub bio: String,
    pub icon: String,
}

impl User {
    #[must_use]
    pub fn viewer(&self) -> Viewer {
        Viewer {
            id: self.id,
            handle: self.handle.clone(),
        }
    }
}

/// Identity of whoever issued the current request.
///
/// Every ownership and visibility rule takes one of these explicitly.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct Viewer {
    pub id: Id<UserMarker>,
    pub handle: UserHandle,
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct CreateUser {
    pub handle: UserHandle,
    pub name: String,
    pub password: PasswordDigest,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
pub struct ProfileUpdate {
    pub name: String,
    pub bio: String,
    /// New icon reference. Ignored when `reset_icon` is set.
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub reset_icon: bool,
}

impl ProfileUpdate {
    /// Icon the profile should carry after the update, if it changes.
    #[must_use]
    pub fn icon_change(&self) -> Option<&str> {
        if self.reset_icon {
            Some(DEFAULT_ICON)
        } else {
            self.icon.as_deref()
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
pub struct FollowCounts {
    pub following: u64,
    pub followers: u64,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
#[serde(transparent)]
pub struct UserHandle(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The user handle is invalid: {0}")]
pub struct InvalidUserHandleError(String);

impl UserHandle {
    pub fn new(handle: String) -> Result<Self, InvalidUserHandleError> {
        let valid = !handle.is_empty()
            && handle.chars().count() <= USER_HANDLE_MAX_LEN
            && !handle.chars().any(|c| c.is_whitespace() || c == '/');

        if valid {
            Ok(UserHandle(handle))
        } else {
            Err(InvalidUserHandleError(handle))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Display for UserHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserHandle {
    type Err = InvalidUserHandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_owned())
    }
}

impl<'de> Deserialize<'de> for UserHandle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        UserHandle::new(inner)
            .map_err(|err| Error::invalid_value(Unexpected::Str(&err.0), &"UserHandle"))
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Bad,
    Good,
    Great,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Unknown rating: {0}")]
pub struct InvalidRatingError(String);

impl Rating {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Rating::Bad => "bad",
            Rating::Good => "good",
            Rating::Great => "great",
        }
    }
}

impl FromStr for Rating {
    type Err = InvalidRatingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bad" => Ok(Rating::Bad),
            "good" => Ok(Rating::Good),
            "great" => Ok(Rating::Great),
            other => Err(InvalidRatingError(other.to_owned())),
        }
    }
}

/// One entry of a user's reading history. A post may appear many times.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct ViewedPost<P> {
    pub post: P,
    pub viewed_at: UtcDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Review<P> {
    pub post: P,
    pub rating: Rating,
    pub reviewed_at: UtcDateTime,
}

/// Applies a rating with upsert semantics: at most one review per post.
///
/// Returns `true` when an existing review was overwritten.
pub fn upsert_review<P: PartialEq>(
    reviews: &mut Vec<Review<P>>,
    post: P,
    rating: Rating,
    at: UtcDateTime,
) -> bool {
    if let Some(existing) = reviews.iter_mut().find(|review| review.post == post) {
        existing.rating = rating;
        existing.reviewed_at = at;
        true
    } else {
        reviews.push(Review {
            post,
            rating,
            reviewed_at: at,
        });
        false
    }
}
