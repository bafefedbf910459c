pub mod time_source;

use std::time::Duration;

/// Converts a duration to whole nanoseconds, saturating at `u64::MAX`.
pub(crate) fn duration_as_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
