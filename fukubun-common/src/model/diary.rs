use crate::model::{
    Id,
    user::{UserMarker, Viewer},
};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{Error, Unexpected},
};
use std::{fmt::Display, str::FromStr};
use thiserror::Error;
use time::{Date, Month, UtcDateTime};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct DiaryMarker;

/// Calendar-day key of a diary entry; at most one entry per owner and day.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct DiaryDate(Date);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Not a calendar date: {0:?}")]
pub struct InvalidDiaryDateError(String);

impl DiaryDate {
    #[must_use]
    pub fn new(date: Date) -> Self {
        Self(date)
    }

    #[must_use]
    pub fn get(self) -> Date {
        self.0
    }
}

impl FromStr for DiaryDate {
    type Err = InvalidDiaryDateError;

    /// Accepts `2025-01-20` as well as the Japanese `2025年1月20日`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidDiaryDateError(s.to_owned());

        let trimmed = s.trim();
        let normalized = trimmed
            .strip_suffix('日')
            .unwrap_or(trimmed)
            .replacen('年', "-", 1)
            .replacen('月', "-", 1);

        let mut parts = normalized.split('-');
        let (Some(year), Some(month), Some(day), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !(all_digits(year) && all_digits(month) && all_digits(day)) || year.len() != 4 {
            return Err(invalid());
        }

        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u8 = month.parse().map_err(|_| invalid())?;
        let day: u8 = day.parse().map_err(|_| invalid())?;
        let month = Month::try_from(month).map_err(|_| invalid())?;

        Date::from_calendar_date(year, month, day)
            .map(Self)
            .map_err(|_| invalid())
    }
}

impl Display for DiaryDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}",
            self.0.year(),
            u8::from(self.0.month()),
            self.0.day()
        )
    }
}

impl Serialize for DiaryDate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DiaryDate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        inner
            .parse()
            .map_err(|_| Error::invalid_value(Unexpected::Str(&inner), &"DiaryDate"))
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Diary {
    pub id: Id<DiaryMarker>,
    pub owner: Id<UserMarker>,
    pub title: String,
    pub content: String,
    pub date: DiaryDate,
    pub is_public: bool,
    pub created_at: UtcDateTime,
    pub updated_at: UtcDateTime,
}

impl Diary {
    #[must_use]
    pub fn owned_by(&self, viewer: &Viewer) -> bool {
        self.owner == viewer.id
    }

    /// Private entries are visible to their owner only.
    #[must_use]
    pub fn visible_to(&self, viewer: &Viewer) -> bool {
        self.is_public || self.owned_by(viewer)
    }
}

/// Diary form exactly as submitted, echoed back when it is rejected.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
pub struct DiaryForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub is_public: bool,
}

/// A validated diary submission.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct DiaryEntry {
    pub title: String,
    pub content: String,
    pub date: DiaryDate,
    pub is_public: bool,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum DiaryRejection {
    #[error("Please write something in the diary")]
    EmptyContent,
    #[error(transparent)]
    InvalidDate(#[from] InvalidDiaryDateError),
    #[error("A diary for {0} already exists")]
    DateTaken(DiaryDate),
}

impl DiaryForm {
    pub fn validate(&self) -> Result<DiaryEntry, DiaryRejection> {
        if self.content.trim().is_empty() {
            return Err(DiaryRejection::EmptyContent);
        }
        let date = self.date.parse()?;

        Ok(DiaryEntry {
            title: self.title.clone(),
            content: self.content.clone(),
            date,
            is_public: self.is_public,
        })
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum DiaryWrite {
    Written(Diary),
    DateTaken,
    NotFound,
    Forbidden,
}

#[cfg(test)]
mod tests {
    use crate::model::{
        Id,
        diary::{Diary, DiaryDate, DiaryForm, DiaryRejection},
        post::tests::user,
    };
    use time::macros::{date, utc_datetime};

    #[test]
    fn parses_both_date_spellings() {
        let expected = DiaryDate::new(date!(2025-01-20));

        assert_eq!("2025-01-20".parse(), Ok(expected));
        assert_eq!("2025-1-20".parse(), Ok(expected));
        assert_eq!("2025年1月20日".parse(), Ok(expected));
        assert_eq!("2025年01月20日".parse(), Ok(expected));
        assert_eq!(" 2025-01-20 ".parse(), Ok(expected));
        assert_eq!(expected.to_string(), "2025-01-20");
    }

    #[test]
    fn rejects_malformed_dates() {
        for input in [
            "",
            "2025-01",
            "2025-13-01",
            "2025-02-30",
            "2025-01-20-01",
            "25-01-20",
            "2025年1月",
            "２０２５-01-20",
            "2025-+1-20",
            "tomorrow",
        ] {
            assert!(input.parse::<DiaryDate>().is_err(), "{input} parsed");
        }
    }

    #[test]
    fn form_validation() {
        let mut form = DiaryForm {
            title: "Monday".to_owned(),
            content: "  \n".to_owned(),
            date: "2025-01-20".to_owned(),
            is_public: false,
        };
        assert_eq!(form.validate(), Err(DiaryRejection::EmptyContent));

        form.content = "hello".to_owned();
        form.date = "someday".to_owned();
        assert!(matches!(
            form.validate(),
            Err(DiaryRejection::InvalidDate(_))
        ));

        form.date = "2025年1月20日".to_owned();
        let entry = form.validate().unwrap();
        assert_eq!(entry.date, DiaryDate::new(date!(2025-01-20)));
        assert_eq!(entry.content, "hello");
    }

    #[test]
    fn private_diary_visible_to_owner_only() {
        let alice = user(1, "alice");
        let bob = user(2, "bob");
        let mut diary = Diary {
            id: Id::from(10),
            owner: alice.id,
            title: String::new(),
            content: "hello".to_owned(),
            date: DiaryDate::new(date!(2025-01-20)),
            is_public: false,
            created_at: utc_datetime!(2025-01-20 10:00),
            updated_at: utc_datetime!(2025-01-20 10:00),
        };

        assert!(diary.visible_to(&alice.viewer()));
        assert!(!diary.visible_to(&bob.viewer()));

        diary.is_public = true;
        assert!(diary.visible_to(&bob.viewer()));
        assert!(!diary.owned_by(&bob.viewer()));
    }

    #[test]
    fn date_serializes_as_key() {
        let date = DiaryDate::new(date!(2026-03-04));

        assert_eq!(serde_json::to_string(&date).unwrap(), "\"2026-03-04\"");
        assert_eq!(
            serde_json::from_str::<DiaryDate>("\"2026年3月4日\"").unwrap(),
            date
        );
    }
}
