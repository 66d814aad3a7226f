use std::time::Duration;

use tokio::time::Instant;

/// Returns true iff strictly more than `threshold` has elapsed since `last_restart_at`.
///
/// A `now` earlier than `last_restart_at` counts as zero elapsed time.
pub fn should_restart(now: Instant, last_restart_at: Instant, threshold: Duration) -> bool {
    now.saturating_duration_since(last_restart_at) > threshold
}
