use crate::{
    model::{Id, user::UserMarker},
    util::local_date,
};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};
use thiserror::Error;
use time::{UtcDateTime, UtcOffset};

pub const RECENT_BOOKS_LIMIT: usize = 3;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct BookMarker;

/// ISBN as typed by the user, with hyphens and spaces removed.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(transparent)]
pub struct Isbn(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Not an ISBN: {0:?}")]
pub struct InvalidIsbnError(String);

impl Isbn {
    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl FromStr for Isbn {
    type Err = InvalidIsbnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | ' '))
            .map(|c| c.to_ascii_uppercase())
            .collect();

        let valid = !compact.is_empty()
            && compact.len() <= 17
            && compact.chars().all(|c| c.is_ascii_digit() || c == 'X');

        if valid {
            Ok(Self(compact))
        } else {
            Err(InvalidIsbnError(s.to_owned()))
        }
    }
}

impl Display for Isbn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Descriptive data fetched once, when the book is added.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Serialize)]
pub struct BookMetadata {
    pub title: String,
    pub authors: String,
    pub thumbnail: String,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
#[error("Reading time must be between 1 and {max} seconds, got {0}", max = u32::MAX)]
pub struct InvalidReadingSecondsError(i64);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct ReadingSeconds(u32);

impl ReadingSeconds {
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<i64> for ReadingSeconds {
    type Error = InvalidReadingSecondsError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match u32::try_from(value) {
            Ok(seconds) if seconds > 0 => Ok(Self(seconds)),
            _ => Err(InvalidReadingSecondsError(value)),
        }
    }
}

/// Reading-time counters of one shelf entry.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
pub struct ReadingLog {
    pub total_seconds: u64,
    pub today_seconds: u64,
    #[serde(skip)]
    pub last_read_at: Option<UtcDateTime>,
}

impl ReadingLog {
    /// Adds a reading session that ended at `now`.
    ///
    /// The daily counter restarts whenever `now` falls on a different local
    /// calendar day than the previous read. The total never decreases.
    pub fn record(&mut self, seconds: ReadingSeconds, now: UtcDateTime, offset: UtcOffset) {
        let same_day = self
            .last_read_at
            .is_some_and(|last| local_date(last, offset) == local_date(now, offset));
        if !same_day {
            self.today_seconds = 0;
        }

        let seconds = u64::from(seconds.get());
        self.total_seconds = self.total_seconds.saturating_add(seconds);
        self.today_seconds = self.today_seconds.saturating_add(seconds);
        self.last_read_at = Some(now);
    }

    /// Seconds read on the local calendar day of `now`.
    #[must_use]
    pub fn read_on(&self, now: UtcDateTime, offset: UtcOffset) -> u64 {
        match self.last_read_at {
            Some(last) if local_date(last, offset) == local_date(now, offset) => {
                self.today_seconds
            }
            _ => 0,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub enum ReadingStatus {
    #[default]
    Idle,
    Reading,
    /// Terminal.
    Finished { at: UtcDateTime },
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Inconsistent reading status: reading={is_reading}, finished={is_finished}")]
pub struct InvalidReadingStatusError {
    pub is_reading: bool,
    pub is_finished: bool,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
#[error("The book is already finished")]
pub struct BookFinishedError;

impl ReadingStatus {
    /// Rebuilds the status from its stored flags.
    pub fn from_flags(
        is_reading: bool,
        finished_at: Option<UtcDateTime>,
    ) -> Result<Self, InvalidReadingStatusError> {
        match (is_reading, finished_at) {
            (false, None) => Ok(ReadingStatus::Idle),
            (true, None) => Ok(ReadingStatus::Reading),
            (false, Some(at)) => Ok(ReadingStatus::Finished { at }),
            (true, Some(_)) => Err(InvalidReadingStatusError {
                is_reading: true,
                is_finished: true,
            }),
        }
    }

    #[must_use]
    pub fn is_reading(self) -> bool {
        matches!(self, ReadingStatus::Reading)
    }

    #[must_use]
    pub fn finished_at(self) -> Option<UtcDateTime> {
        match self {
            ReadingStatus::Finished { at } => Some(at),
            ReadingStatus::Idle | ReadingStatus::Reading => None,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Book {
    pub id: Id<BookMarker>,
    pub owner: Id<UserMarker>,
    pub isbn: Isbn,
    pub metadata: BookMetadata,
    pub reading_note: String,
    pub review: String,
    pub reading: ReadingLog,
    pub status: ReadingStatus,
    pub created_at: UtcDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
pub struct BookNotes {
    #[serde(default)]
    pub reading_note: String,
    #[serde(default)]
    pub review: String,
}

impl Book {
    /// `true` starts a reading session, `false` stops it.
    pub fn set_reading(&mut self, reading: bool) -> Result<(), BookFinishedError> {
        match (self.status, reading) {
            (ReadingStatus::Finished { .. }, true) => Err(BookFinishedError),
            (ReadingStatus::Finished { .. }, false) => Ok(()),
            (_, true) => {
                self.status = ReadingStatus::Reading;
                Ok(())
            }
            (_, false) => {
                self.status = ReadingStatus::Idle;
                Ok(())
            }
        }
    }

    pub fn finish(&mut self, now: UtcDateTime) {
        self.status = ReadingStatus::Finished { at: now };
        self.reading.last_read_at = Some(now);
    }

    pub fn touch(&mut self, now: UtcDateTime) {
        self.reading.last_read_at = Some(now);
    }
}

/// One mutation of a shelf entry, applied to a freshly read copy.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum BookChange {
    Notes(BookNotes),
    Touch {
        now: UtcDateTime,
    },
    SetReading(bool),
    Finish {
        now: UtcDateTime,
    },
    AddReadingTime {
        seconds: ReadingSeconds,
        now: UtcDateTime,
        offset: UtcOffset,
    },
}

impl BookChange {
    pub fn apply(self, book: &mut Book) -> Result<(), BookFinishedError> {
        match self {
            BookChange::Notes(notes) => {
                book.reading_note = notes.reading_note;
                book.review = notes.review;
            }
            BookChange::Touch { now } => book.touch(now),
            BookChange::SetReading(reading) => book.set_reading(reading)?,
            BookChange::Finish { now } => book.finish(now),
            BookChange::AddReadingTime {
                seconds,
                now,
                offset,
            } => book.reading.record(seconds, now, offset),
        }
        Ok(())
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum BookUpdate {
    Updated(Book),
    NotFound,
    Rejected(BookFinishedError),
}

/// The books an owner read most recently, newest first.
#[must_use]
pub fn recently_read(books: &[Book]) -> Vec<&Book> {
    let mut read: Vec<&Book> = books
        .iter()
        .filter(|book| book.reading.last_read_at.is_some())
        .collect();
    read.sort_by(|a, b| b.reading.last_read_at.cmp(&a.reading.last_read_at));
    read.truncate(RECENT_BOOKS_LIMIT);
    read
}

#[cfg(test)]
mod tests {
    use crate::model::{
        Id,
        shelf::{
            Book, BookChange, BookFinishedError, BookMetadata, BookNotes, Isbn, ReadingLog,
            ReadingSeconds, ReadingStatus, recently_read,
        },
    };
    use time::{
        Duration, UtcDateTime,
        macros::{offset, utc_datetime},
    };

    fn seconds(value: i64) -> ReadingSeconds {
        ReadingSeconds::try_from(value).unwrap()
    }

    fn book(id: u64) -> Book {
        Book {
            id: Id::from(id),
            owner: Id::from(1),
            isbn: "123".parse().unwrap(),
            metadata: BookMetadata::default(),
            reading_note: String::new(),
            review: String::new(),
            reading: ReadingLog::default(),
            status: ReadingStatus::Idle,
            created_at: utc_datetime!(2025-01-01 00:00),
        }
    }

    #[test]
    fn same_day_accumulates_next_day_resets() {
        let jst = offset!(+9);
        let morning = utc_datetime!(2025-01-20 00:30);
        let mut log = ReadingLog::default();

        log.record(seconds(30), morning, jst);
        log.record(seconds(45), morning + Duration::hours(2), jst);
        assert_eq!(log.total_seconds, 75);
        assert_eq!(log.today_seconds, 75);

        log.record(seconds(10), morning + Duration::days(1), jst);
        assert_eq!(log.total_seconds, 85);
        assert_eq!(log.today_seconds, 10);
    }

    #[test]
    fn day_boundary_follows_local_offset() {
        let mut log = ReadingLog::default();
        // 14:00 and 16:00 UTC are the same UTC day but straddle midnight in JST.
        log.record(seconds(60), utc_datetime!(2025-01-20 14:00), offset!(+9));
        log.record(seconds(20), utc_datetime!(2025-01-20 16:00), offset!(+9));
        assert_eq!(log.today_seconds, 20);

        let mut utc_log = ReadingLog::default();
        utc_log.record(seconds(60), utc_datetime!(2025-01-20 14:00), offset!(UTC));
        utc_log.record(seconds(20), utc_datetime!(2025-01-20 16:00), offset!(UTC));
        assert_eq!(utc_log.today_seconds, 80);
    }

    #[test]
    fn read_on_ignores_stale_counter() {
        let mut log = ReadingLog::default();
        let at = utc_datetime!(2025-01-20 03:00);
        log.record(seconds(90), at, offset!(+9));

        assert_eq!(log.read_on(at + Duration::hours(1), offset!(+9)), 90);
        assert_eq!(log.read_on(at + Duration::days(1), offset!(+9)), 0);
        assert_eq!(ReadingLog::default().read_on(at, offset!(+9)), 0);
    }

    #[test]
    fn reading_seconds_are_bounded() {
        assert!(ReadingSeconds::try_from(0).is_err());
        assert!(ReadingSeconds::try_from(-5).is_err());
        assert!(ReadingSeconds::try_from(i64::MAX).is_err());
        assert_eq!(
            ReadingSeconds::try_from(i64::from(u32::MAX)).map(ReadingSeconds::get),
            Ok(u32::MAX)
        );
        let too_long = ReadingSeconds::try_from(i64::from(u32::MAX) + 1).unwrap_err();
        assert_eq!(
            too_long.to_string(),
            "Reading time must be between 1 and 4294967295 seconds, got 4294967296"
        );
        assert_eq!(seconds(12).get(), 12);
    }

    #[test]
    fn status_transitions() {
        let mut book = book(1);
        book.set_reading(true).unwrap();
        assert!(book.status.is_reading());
        book.set_reading(false).unwrap();
        assert_eq!(book.status, ReadingStatus::Idle);

        let at = utc_datetime!(2025-06-01 21:00);
        book.set_reading(true).unwrap();
        book.finish(at);
        assert_eq!(book.status.finished_at(), Some(at));
        assert_eq!(book.reading.last_read_at, Some(at));

        assert_eq!(book.set_reading(true), Err(BookFinishedError));
        assert_eq!(book.set_reading(false), Ok(()));
        assert_eq!(book.status, ReadingStatus::Finished { at });
    }

    #[test]
    fn status_flags() {
        let at = utc_datetime!(2025-06-01 21:00);

        assert_eq!(ReadingStatus::from_flags(false, None), Ok(ReadingStatus::Idle));
        assert_eq!(ReadingStatus::from_flags(true, None), Ok(ReadingStatus::Reading));
        assert_eq!(
            ReadingStatus::from_flags(false, Some(at)),
            Ok(ReadingStatus::Finished { at })
        );
        assert!(ReadingStatus::from_flags(true, Some(at)).is_err());
    }

    #[test]
    fn isbn_normalization() {
        assert_eq!("978-4-06-293400-0".parse::<Isbn>().unwrap().get(), "9784062934000");
        assert_eq!("4-06-293400-x".parse::<Isbn>().unwrap().get(), "406293400X");
        assert!("".parse::<Isbn>().is_err());
        assert!("abc".parse::<Isbn>().is_err());
    }

    #[test]
    fn recent_books_newest_first() {
        let base: UtcDateTime = utc_datetime!(2025-03-01 12:00);
        let mut books: Vec<Book> = (1..=5).map(book).collect();
        for (index, book) in books.iter_mut().enumerate().skip(1) {
            book.touch(base + Duration::hours(i64::try_from(index).unwrap()));
        }

        let recent: Vec<u64> = recently_read(&books)
            .into_iter()
            .map(|book| book.id.into())
            .collect();
        assert_eq!(recent, vec![5, 4, 3]);
    }

    #[test]
    fn changes_apply_to_book() {
        let jst = offset!(+9);
        let now = utc_datetime!(2025-01-20 01:00);
        let mut book = book(9);

        BookChange::Notes(BookNotes {
            reading_note: "p. 42".to_owned(),
            review: "good".to_owned(),
        })
        .apply(&mut book)
        .unwrap();
        BookChange::AddReadingTime {
            seconds: seconds(30),
            now,
            offset: jst,
        }
        .apply(&mut book)
        .unwrap();
        BookChange::AddReadingTime {
            seconds: seconds(45),
            now: now + Duration::minutes(5),
            offset: jst,
        }
        .apply(&mut book)
        .unwrap();

        assert_eq!(book.reading_note, "p. 42");
        assert_eq!(book.reading.total_seconds, 75);
        assert_eq!(book.reading.today_seconds, 75);

        BookChange::Finish { now }.apply(&mut book).unwrap();
        assert_eq!(
            BookChange::SetReading(true).apply(&mut book),
            Err(BookFinishedError)
        );
        assert_eq!(book.status.finished_at(), Some(now));
    }
}
