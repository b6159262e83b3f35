// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process ephemeral store with TTL keys, lists, and expiry notifications.

use std::collections::{HashMap, VecDeque};
use std::future::ready;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::{EphemeralStore, StoreFuture};

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    values: HashMap<String, Entry>,
    lists: HashMap<String, VecDeque<Vec<u8>>>,
    /// Keys that lapsed but have not been handed out by `take_expired` yet.
    expired: Vec<String>,
}

impl Inner {
    /// Move every lapsed key out of `values` and into the notification feed.
    fn evict(&mut self, now: Instant) {
        let lapsed: Vec<String> = self
            .values
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in lapsed {
            self.values.remove(&key);
            self.expired.push(key);
        }
    }
}

/// Memory-backed [`EphemeralStore`].
///
/// Uses `tokio::time::Instant` so tests can drive expiry with paused time.
/// Expired keys are evicted on every operation, and each lapse is reported
/// exactly once through [`EphemeralStore::take_expired`].
#[derive(Default)]
pub struct MemoryEphemeral {
    inner: Mutex<Inner>,
}

impl MemoryEphemeral {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut inner = self.inner.lock();
        inner.evict(Instant::now());
        f(&mut inner)
    }
}

impl EphemeralStore for MemoryEphemeral {
    fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreFuture<'_, ()> {
        let expires_at = Instant::now() + ttl;
        self.with(|inner| {
            inner.values.insert(key.to_owned(), Entry { value, expires_at });
        });
        Box::pin(ready(Ok(())))
    }

    fn exists(&self, key: &str) -> StoreFuture<'_, bool> {
        let found = self.with(|inner| inner.values.contains_key(key) || inner.lists.contains_key(key));
        Box::pin(ready(Ok(found)))
    }

    fn push_back(&self, key: &str, value: Vec<u8>) -> StoreFuture<'_, ()> {
        self.with(|inner| inner.lists.entry(key.to_owned()).or_default().push_back(value));
        Box::pin(ready(Ok(())))
    }

    fn pop_front(&self, key: &str) -> StoreFuture<'_, Option<Vec<u8>>> {
        let item = self.with(|inner| {
            let list = inner.lists.get_mut(key)?;
            let item = list.pop_front();
            if list.is_empty() {
                inner.lists.remove(key);
            }
            item
        });
        Box::pin(ready(Ok(item)))
    }

    fn range(&self, key: &str) -> StoreFuture<'_, Vec<Vec<u8>>> {
        let items = self.with(|inner| {
            inner.lists.get(key).map(|l| l.iter().cloned().collect()).unwrap_or_default()
        });
        Box::pin(ready(Ok(items)))
    }

    fn take_expired(&self) -> StoreFuture<'_, Vec<String>> {
        let keys = self.with(|inner| std::mem::take(&mut inner.expired));
        Box::pin(ready(Ok(keys)))
    }
}

impl MemoryEphemeral {
    /// Current value of a live key.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.with(|inner| inner.values.get(key).map(|e| e.value.clone()))
    }

    /// Remaining TTL of a live key.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.with(|inner| inner.values.get(key).map(|e| e.expires_at.saturating_duration_since(now)))
    }
}

#[cfg(test)]
#[path = "ephemeral_tests.rs"]
mod tests;
