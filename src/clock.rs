//! Wall-clock and virtual time sources
//!
//! The simulator advances a virtual clock in fixed increments; everything
//! else reads time through the same handle so timestamps stay consistent
//! between live and simulated runs.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Clone)]
enum Source {
    Wall,
    Virtual(Arc<AtomicI64>),
}

/// A cheap, cloneable time source.
#[derive(Debug, Clone)]
pub struct Clock {
    source: Source,
}

impl Clock {
    /// Real time.
    pub fn wall() -> Self {
        Clock { source: Source::Wall }
    }

    /// A virtual clock starting at `start`, advanced only by [`Clock::advance`].
    pub fn virtual_at(start: DateTime<Utc>) -> Self {
        Clock {
            source: Source::Virtual(Arc::new(AtomicI64::new(start.timestamp()))),
        }
    }

    /// Current time.
    pub fn now(&self) -> DateTime<Utc> {
        match &self.source {
            Source::Wall => Utc::now(),
            Source::Virtual(secs) => {
                DateTime::<Utc>::from_timestamp(secs.load(Ordering::SeqCst), 0)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC)
            }
        }
    }

    /// Step a virtual clock forward. No effect on a wall clock.
    pub fn advance(&self, seconds: i64) {
        if let Source::Virtual(secs) = &self.source {
            secs.fetch_add(seconds, Ordering::SeqCst);
        }
    }

    /// Whether this clock is virtual.
    pub fn is_virtual(&self) -> bool {
        matches!(self.source, Source::Virtual(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_clock_advances_in_steps() {
        let start = Utc::now();
        let clock = Clock::virtual_at(start);
        assert_eq!(clock.now().timestamp(), start.timestamp());

        clock.advance(2);
        clock.advance(2);
        assert_eq!(clock.now().timestamp(), start.timestamp() + 4);
    }

    #[test]
    fn clones_share_the_same_virtual_time() {
        let clock = Clock::virtual_at(Utc::now());
        let other = clock.clone();
        clock.advance(10);
        assert_eq!(clock.now(), other.now());
    }
}
