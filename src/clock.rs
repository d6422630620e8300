//! Wall-clock source for callers driving the session manager.
//!
//! The manager never reads time itself; the runtime's callers and the CLI
//! take `now_ms` from here.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch; zero if the clock reads before it.
pub fn wall_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_clock_is_past_the_epoch() {
        let a = wall_ms();
        let b = wall_ms();
        assert!(a > 0);
        assert!(b >= a);
    }
}
