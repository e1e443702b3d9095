//! A simple token-bucket rate limiter.
//!
//! We use this to bound how fast a single peer can make us do
//! public-key operations.

use std::time::{Duration, Instant};

/// A token bucket that refills at a fixed whole-token rate.
#[derive(Debug)]
pub(crate) struct TokenBucket {
    /// Maximum number of tokens the bucket can hold.
    capacity: u32,
    /// Number of tokens available right now.
    available: u32,
    /// How many tokens are added per second.
    refill_per_sec: u32,
    /// The last time we credited refill tokens.
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a bucket that starts out full.
    pub(crate) fn new(capacity: u32, refill_per_sec: u32) -> Self {
        TokenBucket {
            capacity,
            available: capacity,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    /// Take one token, if there is one; return false otherwise.
    pub(crate) fn take(&mut self) -> bool {
        self.take_at(Instant::now())
    }

    /// As [`Self::take`], with an explicit clock reading.
    pub(crate) fn take_at(&mut self, now: Instant) -> bool {
        self.refill_at(now);
        if self.available > 0 {
            self.available -= 1;
            true
        } else {
            false
        }
    }

    /// Credit any whole tokens that have accrued since the last refill.
    fn refill_at(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let new_tokens = (elapsed.as_secs() as u32).saturating_mul(self.refill_per_sec);
        if new_tokens > 0 {
            self.available = self.available.saturating_add(new_tokens).min(self.capacity);
            // Keep the fractional second, so a slow trickle of calls
            // still accumulates tokens.
            self.last_refill += Duration::from_secs(elapsed.as_secs());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn draining_and_refilling() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(3, 2);

        assert!(bucket.take_at(start));
        assert!(bucket.take_at(start));
        assert!(bucket.take_at(start));
        assert!(!bucket.take_at(start));

        // A half second isn't enough for a whole token.
        assert!(!bucket.take_at(start + Duration::from_millis(500)));

        // One second restores two tokens.
        assert!(bucket.take_at(start + Duration::from_secs(1)));
        assert!(bucket.take_at(start + Duration::from_secs(1)));
        assert!(!bucket.take_at(start + Duration::from_secs(1)));

        // Refill never exceeds capacity.
        assert!(bucket.take_at(start + Duration::from_secs(3600)));
        assert!(bucket.take_at(start + Duration::from_secs(3600)));
        assert!(bucket.take_at(start + Duration::from_secs(3600)));
        assert!(!bucket.take_at(start + Duration::from_secs(3600)));
    }
}
