use chrono::offset::{LocalResult, Offset};
use chrono::{DateTime, TimeZone, Timelike, Utc};
use medallion_types::{BucketAlignment, IntervalSize};

/// Floor `ts` to the start of its bucket.
///
/// UTC alignment floors to multiples of the width since the epoch. Market
/// alignment floors in local wall-clock time from local midnight, so hourly
/// and daily buckets follow the market day across DST changes.
#[must_use]
pub fn bucket_start(
    ts: DateTime<Utc>,
    interval: IntervalSize,
    alignment: BucketAlignment,
) -> Option<DateTime<Utc>> {
    match alignment {
        BucketAlignment::Utc => bucket_utc(ts, interval.seconds()),
        BucketAlignment::Market(tz) => bucket_with_tz(ts, interval.seconds(), tz),
    }
}

const fn bucket_utc(ts: DateTime<Utc>, step: i64) -> Option<DateTime<Utc>> {
    let secs = ts.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(step), 0)
}

fn bucket_with_tz(ts: DateTime<Utc>, step: i64, tz: chrono_tz::Tz) -> Option<DateTime<Utc>> {
    let local = ts.with_timezone(&tz);
    let since_midnight = i64::from(local.num_seconds_from_midnight());
    let bucket_sec = since_midnight - since_midnight.rem_euclid(step);
    let naive = local.date_naive().and_hms_opt(0, 0, 0)? + chrono::Duration::seconds(bucket_sec);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(first, second) => {
            // Keep the side of the fall-back overlap the instant itself is on.
            let offset = local.offset().fix().local_minus_utc();
            if first.offset().fix().local_minus_utc() == offset {
                Some(first.with_timezone(&Utc))
            } else {
                Some(second.with_timezone(&Utc))
            }
        }
        LocalResult::None => bucket_utc(ts, step),
    }
}
