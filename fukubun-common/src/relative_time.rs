//! Human readable "how long ago" strings shared by every listing.

use time::{UtcDateTime, UtcOffset};

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;

/// Formats `at` relative to `now`.
///
/// Less than a minute reads "just now", then minutes, hours and days up to a
/// week. Anything older is shown as the local calendar date `YYYY/M/D`.
/// Timestamps in the future also read "just now".
#[must_use]
pub fn relative_time(now: UtcDateTime, at: UtcDateTime, offset: UtcOffset) -> String {
    let elapsed = (now - at).whole_seconds();

    match elapsed {
        i64::MIN..MINUTE => "just now".to_owned(),
        MINUTE..HOUR => ago(elapsed / MINUTE, "minute"),
        HOUR..DAY => ago(elapsed / HOUR, "hour"),
        DAY..WEEK => ago(elapsed / DAY, "day"),
        _ => {
            let local = at.to_offset(offset);
            format!(
                "{}/{}/{}",
                local.year(),
                u8::from(local.month()),
                local.day()
            )
        }
    }
}

fn ago(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}

#[cfg(test)]
mod tests {
    use crate::relative_time::relative_time;
    use time::{
        Duration,
        macros::{offset, utc_datetime},
    };

    #[test]
    fn thresholds() {
        let now = utc_datetime!(2025-01-20 12:00);
        let jst = offset!(+9);
        let cases = [
            (Duration::ZERO, "just now"),
            (Duration::seconds(59), "just now"),
            (Duration::seconds(60), "1 minute ago"),
            (Duration::minutes(59), "59 minutes ago"),
            (Duration::hours(1), "1 hour ago"),
            (Duration::hours(23) + Duration::minutes(59), "23 hours ago"),
            (Duration::hours(24), "1 day ago"),
            (Duration::days(6) + Duration::hours(23), "6 days ago"),
            (Duration::days(7), "2025/1/13"),
            (Duration::days(40), "2024/12/11"),
        ];

        for (elapsed, expected) in cases {
            assert_eq!(relative_time(now, now - elapsed, jst), expected, "{elapsed}");
        }
    }

    #[test]
    fn future_reads_just_now() {
        let now = utc_datetime!(2025-01-20 12:00);

        assert_eq!(
            relative_time(now, now + Duration::hours(3), offset!(UTC)),
            "just now"
        );
    }

    #[test]
    fn absolute_date_uses_local_offset() {
        let now = utc_datetime!(2025-03-01 00:00);
        let at = utc_datetime!(2025-01-31 20:00);

        assert_eq!(relative_time(now, at, offset!(UTC)), "2025/1/31");
        assert_eq!(relative_time(now, at, offset!(+9)), "2025/2/1");
    }
}
