use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

struct TimedValue<V> {
    value: V,
    inserted_at: Instant,
}

struct TimedMap<K, V> {
    map: HashMap<K, TimedValue<V>>,
    ttl: Duration,
}

impl<K, V> TimedMap<K, V>
where
    K: std::hash::Hash + Eq,
{
    fn new(ttl: Duration) -> Self {
        Self {
            map: HashMap::new(),
            ttl,
        }
    }

    fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key).and_then(|tv| {
            if tv.inserted_at.elapsed() < self.ttl {
                Some(&tv.value)
            } else {
                None
            }
        })
    }

    fn insert(&mut self, key: K, value: V) {
        self.map.insert(
            key,
            TimedValue {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    fn cleanup_expired(&mut self) {
        self.map.retain(|_, tv| tv.inserted_at.elapsed() < self.ttl);
    }
}

/// Read-mostly cache of member display names per room. Mention resolution
/// hits the roster collaborator once per member and TTL window; refreshes
/// come from the lookup path itself, not from a background job.
pub struct MemberNameCache {
    inner: RwLock<TimedMap<(i64, i64), String>>,
}

impl MemberNameCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(TimedMap::new(ttl)),
        }
    }

    pub async fn get(&self, room_id: i64, user_id: i64) -> Option<String> {
        self.inner.read().await.get(&(room_id, user_id)).cloned()
    }

    pub async fn insert(&self, room_id: i64, user_id: i64, name: String) {
        let mut inner = self.inner.write().await;
        inner.cleanup_expired();
        inner.insert((room_id, user_id), name);
    }
}

impl Default for MemberNameCache {
    fn default() -> Self {
        // Group cards change rarely; a minute keeps headers fresh enough.
        Self::new(Duration::from_secs(60))
    }
}
