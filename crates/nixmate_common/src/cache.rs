//! Recognition cache - LRU with TTL in front of the intent recognizer
//!
//! Only the context-free recognition result is cached. Key derivation, TTL
//! and invalidation stay visible at the call site:
//!
//! ```ignore
//! let intent = cache.get_or_insert_with(text, || recognizer.recognize(text));
//! ```

use crate::types::Intent;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry {
    intent: Intent,
    inserted_at: Instant,
}

/// Cache key: trimmed, lower-cased, whitespace collapsed
pub fn cache_key(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug)]
pub struct RecognitionCache {
    // None when caching is disabled
    cache: Option<Mutex<LruCache<String, CacheEntry>>>,
    ttl: Duration,
}

impl RecognitionCache {
    /// * `capacity` - maximum entries; 0 disables the cache
    /// * `ttl` - how long a recognition stays valid
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            ttl,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Cached intent for `text`, or compute, store and return it.
    ///
    /// Rejected intents are returned but never stored.
    pub fn get_or_insert_with<F>(&self, text: &str, recognize: F) -> Intent
    where
        F: FnOnce() -> Intent,
    {
        let Some(cache) = &self.cache else {
            return recognize();
        };
        let key = cache_key(text);
        let now = Instant::now();

        {
            let mut cache = cache.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(entry) = cache.get(&key) {
                if now.duration_since(entry.inserted_at) < self.ttl {
                    let mut intent = entry.intent.clone();
                    intent.original_text = text.to_string();
                    return intent;
                }
                cache.pop(&key);
            }
        }

        // Recognise outside the lock
        let intent = recognize();
        if !intent.is_rejected() {
            let mut cache = cache.lock().unwrap_or_else(|p| p.into_inner());
            cache.put(
                key,
                CacheEntry {
                    intent: intent.clone(),
                    inserted_at: now,
                },
            );
        }
        intent
    }

    /// Drop everything, e.g. after the catalog or configuration changed
    pub fn invalidate_all(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().unwrap_or_else(|p| p.into_inner()).clear();
        }
    }

    pub fn len(&self) -> usize {
        self.cache
            .as_ref()
            .map(|c| c.lock().unwrap_or_else(|p| p.into_inner()).len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RecognitionCache {
    fn default() -> Self {
        Self::new(256, Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntentAction;
    use std::cell::Cell;

    fn install(text: &str) -> Intent {
        Intent::new(
            IntentAction::Install {
                package: Some("firefox".to_string()),
            },
            0.95,
            text,
        )
    }

    #[test]
    fn test_key_derivation() {
        assert_eq!(cache_key("  Install   FIREFOX "), "install firefox");
    }

    #[test]
    fn test_hit_skips_recognizer() {
        let cache = RecognitionCache::new(8, Duration::from_secs(60));
        let calls = Cell::new(0);
        let recognize = |t: &str| {
            calls.set(calls.get() + 1);
            install(t)
        };

        cache.get_or_insert_with("install firefox", || recognize("install firefox"));
        let hit = cache.get_or_insert_with("Install  Firefox", || recognize("Install  Firefox"));
        assert_eq!(calls.get(), 1);
        assert_eq!(hit.original_text, "Install  Firefox");
    }

    #[test]
    fn test_expired_entry_recomputed() {
        let cache = RecognitionCache::new(8, Duration::from_millis(10));
        let calls = Cell::new(0);
        let mut run = || {
            cache.get_or_insert_with("install firefox", || {
                calls.set(calls.get() + 1);
                install("install firefox")
            })
        };
        run();
        std::thread::sleep(Duration::from_millis(30));
        run();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_rejected_not_cached() {
        let cache = RecognitionCache::default();
        cache.get_or_insert_with("x; y", || Intent::rejected("x; y", "metachar"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_and_disabled() {
        let cache = RecognitionCache::default();
        cache.get_or_insert_with("a", || install("a"));
        assert_eq!(cache.len(), 1);
        cache.invalidate_all();
        assert!(cache.is_empty());

        let off = RecognitionCache::disabled();
        off.get_or_insert_with("a", || install("a"));
        assert!(!off.is_enabled());
        assert!(off.is_empty());
    }
}
