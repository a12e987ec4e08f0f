pub mod logging;

use chrono::{DateTime, Utc};

/// Milliseconds since the Unix epoch, the timestamp format of stored records.
pub fn epoch_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Whole seconds elapsed between a stored epoch-millis stamp and `now`.
///
/// Clock skew (a stamp in the future) counts as zero.
pub fn elapsed_whole_secs(stamp_ms: i64, now: DateTime<Utc>) -> u64 {
    let delta = now.timestamp_millis().saturating_sub(stamp_ms);
    if delta <= 0 {
        0
    } else {
        (delta / 1000) as u64
    }
}
