//! Run-wide record of attempted media references.

use sbank_models::{normalize_media_url, MediaRef};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

/// Insert-only set of media references that have been dispatched.
///
/// Keys are normalised URLs, so `youtu.be/x` and `youtube.com/watch?v=x`
/// count as the same reference.
#[derive(Debug, Default)]
pub struct DedupLedger {
    seen: Mutex<HashSet<String>>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger pre-populated with URLs from an earlier run of the session.
    pub fn seeded<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let seen = urls
            .into_iter()
            .map(|u| normalize_media_url(u.as_ref()))
            .collect();
        Self {
            seen: Mutex::new(seen),
        }
    }

    /// Atomically record `media`. Returns true only the first time.
    pub fn try_reserve(&self, media: &MediaRef) -> bool {
        let key = media.dedup_key();
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key)
    }

    pub fn contains(&self, media: &MediaRef) -> bool {
        let key = media.dedup_key();
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_reserve_once() {
        let ledger = DedupLedger::new();
        let media = MediaRef::new("abc", "https://www.youtube.com/watch?v=abc");
        assert!(ledger.try_reserve(&media));
        assert!(!ledger.try_reserve(&media));
        assert!(ledger.contains(&media));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_url_spellings_collide() {
        let ledger = DedupLedger::new();
        assert!(ledger.try_reserve(&MediaRef::new("abc", "https://youtu.be/abc")));
        assert!(!ledger.try_reserve(&MediaRef::new(
            "abc",
            "https://www.youtube.com/watch?v=abc&t=42s"
        )));
    }

    #[test]
    fn test_seeded_ledger() {
        let ledger = DedupLedger::seeded(["https://youtu.be/old"]);
        assert!(!ledger.try_reserve(&MediaRef::new("old", "https://youtube.com/shorts/old")));
        assert!(ledger.try_reserve(&MediaRef::new("new", "https://youtu.be/new")));
    }

    #[test]
    fn test_concurrent_reserve_wins_once() {
        let ledger = Arc::new(DedupLedger::new());
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let wins = Arc::clone(&wins);
                std::thread::spawn(move || {
                    let media = MediaRef::new("race", "https://youtu.be/race");
                    if ledger.try_reserve(&media) {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.len(), 1);
    }
}
