pub mod auth;
pub mod diary;
pub mod post;
pub mod shelf;
pub mod user;

use crate::{
    model::{
        auth::InvalidAuthTokenHashError,
        diary::InvalidDiaryDateError,
        post::InvalidPostKindError,
        shelf::{InvalidIsbnError, InvalidReadingSecondsError, InvalidReadingStatusError},
        user::{InvalidRatingError, InvalidUserHandleError},
    },
    snowflake::{Epoch, Snowflake, SnowflakeGenerator},
    util::NonPositiveDurationError,
};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, Visitor},
};
use std::{
    fmt::{self, Display},
    marker::PhantomData,
    num::ParseIntError,
    str::FromStr,
};
use thiserror::Error;
use time::{UtcDateTime, macros::utc_datetime};

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    UserHandle(#[from] InvalidUserHandleError),
    #[error(transparent)]
    NonPositiveDuration(#[from] NonPositiveDurationError),
    #[error(transparent)]
    TokenHash(#[from] InvalidAuthTokenHashError),
    #[error(transparent)]
    PostKind(#[from] InvalidPostKindError),
    #[error(transparent)]
    Rating(#[from] InvalidRatingError),
    #[error(transparent)]
    DiaryDate(#[from] InvalidDiaryDateError),
    #[error(transparent)]
    Isbn(#[from] InvalidIsbnError),
    #[error(transparent)]
    ReadingStatus(#[from] InvalidReadingStatusError),
    #[error(transparent)]
    ReadingSeconds(#[from] InvalidReadingSecondsError),
    #[error("A reading counter was negative: {0}")]
    NegativeCounter(i64),
    #[error("Timeline post {0} has no author")]
    MissingAuthor(u64),
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct FukubunEpoch;
impl Epoch for FukubunEpoch {
    const EPOCH_TIME: UtcDateTime = utc_datetime!(2025-01-01 00:00);
}

pub type FukubunSnowflake = Snowflake<FukubunEpoch>;
pub type FukubunSnowflakeGenerator = SnowflakeGenerator<FukubunEpoch>;

/// Serialized as a decimal string so browsers keep every digit. Integers are
/// accepted on input.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct Id<Marker>(FukubunSnowflake, PhantomData<Marker>);

impl<Marker> Id<Marker> {
    #[must_use]
    pub fn new(snowflake: FukubunSnowflake) -> Self {
        Self(snowflake, PhantomData)
    }

    #[must_use]
    pub fn snowflake(self) -> FukubunSnowflake {
        self.0
    }

    /// Id as stored in a signed `BIGINT` column.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        self.0.get().cast_signed()
    }

    #[must_use]
    pub fn from_i64(value: i64) -> Self {
        value.cast_unsigned().into()
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> Serialize for Id<Marker> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct IdVisitor<Marker>(PhantomData<Marker>);

impl<Marker> Visitor<'_> for IdVisitor<Marker> {
    type Value = Id<Marker>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a snowflake id as a string or an unsigned integer")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(v.into())
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.parse().map_err(E::custom)
    }
}

impl<'de, Marker> Deserialize<'de> for Id<Marker> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(IdVisitor(PhantomData))
    }
}

impl<Marker> FromStr for Id<Marker> {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str(s).map(Self::from)
    }
}

impl<Marker> From<FukubunSnowflake> for Id<Marker> {
    fn from(value: FukubunSnowflake) -> Self {
        Self::new(value)
    }
}

impl<Marker> From<Id<Marker>> for FukubunSnowflake {
    fn from(value: Id<Marker>) -> Self {
        value.0
    }
}

impl<Marker> From<u64> for Id<Marker> {
    fn from(value: u64) -> Self {
        Id::new(FukubunSnowflake::new(value))
    }
}

impl<Marker> From<Id<Marker>> for u64 {
    fn from(value: Id<Marker>) -> Self {
        value.snowflake().get()
    }
}
