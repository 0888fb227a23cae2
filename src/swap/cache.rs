use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use bitcoin::hashes::{Hash as _, sha256};
use tokio::time::Instant;

/// Key/value store shared by swap components.
///
/// Callers scope keys with [`scoped_key`] so features sharing one keyspace
/// don't collide.
pub trait SwapCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: String, ttl: Duration);

    fn delete(&self, key: &str);

    /// Removes the value at `key` and returns it. Of several concurrent
    /// callers, at most one receives the value.
    fn take(&self, key: &str) -> Option<String>;

    /// Merges `value` into the collection at `key`, ordered by `sort_key`.
    /// Every addition refreshes the TTL of the whole collection.
    fn add(&self, key: &str, sort_key: &str, value: String, ttl: Duration);

    /// Members of the collection at `key`, in `sort_key` order.
    fn members(&self, key: &str) -> Vec<String>;
}

/// SHA-256 hex of `kind/key`.
pub fn scoped_key(kind: &str, key: &str) -> String {
    let digest = sha256::Hash::hash(format!("{kind}/{key}").as_bytes());
    hex::encode(digest.to_byte_array())
}

#[derive(Debug)]
enum Entry {
    Value(String),
    Set(BTreeMap<String, String>),
}

#[derive(Debug)]
struct Slot {
    entry: Entry,
    expires_at: Instant,
}

/// In-process [`SwapCache`]. Expired slots are dropped when read, and swept
/// from the whole map on every write.
#[derive(Debug, Default)]
pub struct MemoryCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_live<R>(&self, key: &str, f: impl FnOnce(Option<&mut Slot>) -> R) -> R {
        let mut slots = self.slots.lock().expect("cache mutex poisoned");
        if slots
            .get(key)
            .is_some_and(|slot| slot.expires_at <= Instant::now())
        {
            slots.remove(key);
        }
        f(slots.get_mut(key))
    }

    fn sweep(slots: &mut HashMap<String, Slot>, now: Instant) {
        slots.retain(|_, slot| slot.expires_at > now);
    }
}

impl SwapCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.with_live(key, |slot| match slot.map(|s| &s.entry) {
            Some(Entry::Value(value)) => Some(value.clone()),
            _ => None,
        })
    }

    fn set(&self, key: &str, value: String, ttl: Duration) {
        let now = Instant::now();
        let slot = Slot {
            entry: Entry::Value(value),
            expires_at: now + ttl,
        };
        let mut slots = self.slots.lock().expect("cache mutex poisoned");
        Self::sweep(&mut slots, now);
        slots.insert(key.to_string(), slot);
    }

    fn delete(&self, key: &str) {
        self.slots.lock().expect("cache mutex poisoned").remove(key);
    }

    fn take(&self, key: &str) -> Option<String> {
        let mut slots = self.slots.lock().expect("cache mutex poisoned");
        let now = Instant::now();
        let live_value = matches!(
            slots.get(key),
            Some(Slot { entry: Entry::Value(_), expires_at }) if *expires_at > now
        );
        if !live_value {
            return None;
        }
        match slots.remove(key) {
            Some(Slot {
                entry: Entry::Value(value),
                ..
            }) => Some(value),
            _ => None,
        }
    }

    fn add(&self, key: &str, sort_key: &str, value: String, ttl: Duration) {
        let now = Instant::now();
        let expires_at = now + ttl;
        let mut slots = self.slots.lock().expect("cache mutex poisoned");
        Self::sweep(&mut slots, now);

        if let Some(Slot {
            entry: Entry::Set(members),
            expires_at: slot_expiry,
        }) = slots.get_mut(key)
            && *slot_expiry > now
        {
            members.insert(sort_key.to_string(), value);
            *slot_expiry = expires_at;
            return;
        }

        let members = BTreeMap::from([(sort_key.to_string(), value)]);
        slots.insert(
            key.to_string(),
            Slot {
                entry: Entry::Set(members),
                expires_at,
            },
        );
    }

    fn members(&self, key: &str) -> Vec<String> {
        self.with_live(key, |slot| match slot.map(|s| &s.entry) {
            Some(Entry::Set(members)) => members.values().cloned().collect(),
            _ => Vec::new(),
        })
    }
}
