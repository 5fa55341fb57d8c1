use std::time::{Duration, Instant};

/// A value held by [`crate::MemoryClient`] together with its expiry.
///
/// The TTL is fixed at insertion time: every `set` produces a fresh entry.
///
/// # Examples
///
/// ```
/// use cacheable_core::CacheEntry;
/// use std::time::Duration;
///
/// let entry = CacheEntry::new(42, Some(Duration::from_secs(60)));
/// assert_eq!(entry.value, 42);
/// assert!(!entry.is_expired());
///
/// // No TTL means the entry never expires
/// let forever = CacheEntry::new("data", None);
/// assert!(!forever.is_expired());
/// ```
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: Instant,
    pub ttl: Option<Duration>,
}

impl<V> CacheEntry<V> {
    /// Creates an entry stamped with `Instant::now()`.
    pub fn new(value: V, ttl: Option<Duration>) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
            ttl,
        }
    }

    /// Returns true once the entry is at least `ttl` old.
    ///
    /// A zero TTL expires immediately.
    pub fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => self.inserted_at.elapsed() >= ttl,
            None => false,
        }
    }

    /// Time left before expiry, `None` for entries without TTL.
    pub fn remaining(&self) -> Option<Duration> {
        self.ttl
            .map(|ttl| ttl.saturating_sub(self.inserted_at.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_entry_without_ttl() {
        let entry = CacheEntry::new(1, None);
        assert!(!entry.is_expired());
        assert_eq!(entry.remaining(), None);
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let entry = CacheEntry::new(1, Some(Duration::ZERO));
        assert!(entry.is_expired());
    }

    #[test]
    fn test_entry_expires() {
        let entry = CacheEntry::new("v", Some(Duration::from_millis(20)));
        assert!(!entry.is_expired());
        assert!(entry.remaining().unwrap() <= Duration::from_millis(20));

        thread::sleep(Duration::from_millis(40));
        assert!(entry.is_expired());
        assert_eq!(entry.remaining(), Some(Duration::ZERO));
    }
}
