use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// Primitive operations the engine needs from its backing store: namespaced
/// list push/pop, set membership, hashes, counters, and expiry. Every method
/// is a single atomic operation on the store; the engine layers no locking
/// on top.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Tear down and re-establish the store connection. A forked child must
    /// not share its parent's live connection.
    async fn reconnect(&self) -> Result<()>;

    async fn rpush(&self, key: &str, value: &str) -> Result<()>;
    async fn lpop(&self, key: &str) -> Result<Option<String>>;
    async fn llen(&self, key: &str) -> Result<i64>;

    async fn sadd(&self, key: &str, member: &str) -> Result<bool>;
    async fn srem(&self, key: &str, member: &str) -> Result<bool>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()>;
    async fn set_nx(&self, key: &str, value: &str) -> Result<bool>;
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;
    async fn decr_by(&self, key: &str, delta: i64) -> Result<i64>;

    async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<bool>;
    async fn del(&self, key: &str) -> Result<bool>;
    async fn exists(&self, key: &str) -> Result<bool>;
}

fn summarize_redis_dsn(dsn: &str) -> String {
    let (scheme, rest) = dsn.split_once("://").unwrap_or(("", dsn));
    let without_auth = rest.rsplit('@').next().unwrap_or(rest);
    let host = without_auth
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(without_auth);

    if scheme.is_empty() {
        host.to_string()
    } else if host.is_empty() {
        format!("{scheme}://")
    } else {
        format!("{scheme}://{host}")
    }
}

/// Redis-backed store on a multiplexed async connection. Connection failure
/// is fatal and surfaces immediately; individual command failures propagate
/// the redis crate's own errors.
pub struct RedisBackend {
    client: redis::Client,
    conn: Mutex<redis::aio::MultiplexedConnection>,
}

impl RedisBackend {
    pub async fn connect(dsn: &str) -> Result<Self> {
        let client = redis::Client::open(dsn)
            .map_err(|err| Error::Connection(format!("invalid Redis DSN: {err}")))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| {
                Error::Connection(format!(
                    "failed to connect to Redis ({}): {err}",
                    summarize_redis_dsn(dsn)
                ))
            })?;
        Ok(Self {
            client,
            conn: Mutex::new(conn),
        })
    }

    async fn conn(&self) -> redis::aio::MultiplexedConnection {
        self.conn.lock().await.clone()
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn reconnect(&self) -> Result<()> {
        let fresh = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| Error::Connection(format!("failed to reconnect to Redis: {err}")))?;
        *self.conn.lock().await = fresh;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn().await;
        conn.rpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await;
        let value: Option<String> = conn.lpop(key, None).await?;
        Ok(value)
    }

    async fn llen(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn().await;
        let len: i64 = conn.llen(key).await?;
        Ok(len)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn().await;
        let added: i64 = conn.sadd(key, member).await?;
        Ok(added != 0)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn().await;
        let removed: i64 = conn.srem(key, member).await?;
        Ok(removed != 0)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await;
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn().await;
        let found: bool = conn.sismember(key, member).await?;
        Ok(found)
    }

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await;
        let fields_ref: Vec<(&str, &str)> = fields
            .iter()
            .map(|(field, value)| (field.as_str(), value.as_str()))
            .collect();
        conn.hset_multiple::<_, _, _, ()>(key, &fields_ref).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn().await;
        let raw: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(raw)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn().await;
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn().await;
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds).await?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.conn().await;
        let set: bool = conn.set_nx(key, value).await?;
        Ok(set)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn().await;
        let value: i64 = conn.incr(key, delta).await?;
        Ok(value)
    }

    async fn decr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn().await;
        let value: i64 = conn.decr(key, delta).await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<bool> {
        let mut conn = self.conn().await;
        let set: bool = conn.expire(key, ttl_seconds).await?;
        Ok(set)
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await;
        let removed: i64 = conn.del(key).await?;
        Ok(removed != 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await;
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }
}

#[derive(Default)]
struct MemoryState {
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, std::collections::BTreeSet<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    strings: HashMap<String, String>,
    expirations: HashMap<String, Instant>,
}

impl MemoryState {
    fn purge_expired(&mut self, key: &str) {
        let expired = self
            .expirations
            .get(key)
            .map(|deadline| *deadline <= Instant::now())
            .unwrap_or(false);
        if expired {
            self.expirations.remove(key);
            self.lists.remove(key);
            self.sets.remove(key);
            self.hashes.remove(key);
            self.strings.remove(key);
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        self.expirations.remove(key);
        let mut removed = self.lists.remove(key).is_some();
        removed |= self.sets.remove(key).is_some();
        removed |= self.hashes.remove(key).is_some();
        removed |= self.strings.remove(key).is_some();
        removed
    }

    fn contains(&self, key: &str) -> bool {
        self.lists.contains_key(key)
            || self.sets.contains_key(key)
            || self.hashes.contains_key(key)
            || self.strings.contains_key(key)
    }
}

/// In-process store with the same atomicity guarantees as the Redis backend
/// (one mutex around all state). Suitable for tests and single-process runs;
/// clones share state, so concurrent pollers contend the way separate worker
/// processes do against Redis.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn reconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.purge_expired(key);
        state
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.state.lock().await;
        state.purge_expired(key);
        let popped = state.lists.get_mut(key).and_then(VecDeque::pop_front);
        if let Some(list) = state.lists.get(key) {
            if list.is_empty() {
                state.lists.remove(key);
            }
        }
        Ok(popped)
    }

    async fn llen(&self, key: &str) -> Result<i64> {
        let mut state = self.state.lock().await;
        state.purge_expired(key);
        Ok(state.lists.get(key).map(VecDeque::len).unwrap_or(0) as i64)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.purge_expired(key);
        Ok(state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.purge_expired(key);
        Ok(state
            .sets
            .get_mut(key)
            .map(|set| set.remove(member))
            .unwrap_or(false))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        state.purge_expired(key);
        Ok(state
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.purge_expired(key);
        Ok(state
            .sets
            .get(key)
            .map(|set| set.contains(member))
            .unwrap_or(false))
    }

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut state = self.state.lock().await;
        state.purge_expired(key);
        let hash = state.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut state = self.state.lock().await;
        state.purge_expired(key);
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.state.lock().await;
        state.purge_expired(key);
        Ok(state.strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.expirations.remove(key);
        state.strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.strings.insert(key.to_string(), value.to_string());
        state.expirations.insert(
            key.to_string(),
            Instant::now() + Duration::from_secs(ttl_seconds),
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.purge_expired(key);
        if state.strings.contains_key(key) {
            return Ok(false);
        }
        state.strings.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut state = self.state.lock().await;
        state.purge_expired(key);
        let current: i64 = state
            .strings
            .get(key)
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        let next = current + delta;
        state.strings.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn decr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.incr_by(key, -delta).await
    }

    async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.purge_expired(key);
        if !state.contains(key) {
            return Ok(false);
        }
        if ttl_seconds <= 0 {
            state.remove(key);
            return Ok(true);
        }
        state.expirations.insert(
            key.to_string(),
            Instant::now() + Duration::from_secs(ttl_seconds as u64),
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.remove(key))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.purge_expired(key);
        Ok(state.contains(key))
    }
}

/// Namespacing adapter over a [`Backend`]. Every key the engine touches goes
/// through [`Store::key`], so one Redis database can host several isolated
/// deployments.
///
/// Fork safety is explicit: a process supervisor that forks or re-execs must
/// call [`Store::reconnect_if_forked`] before issuing further operations.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn Backend>,
    namespace: String,
    owner_pid: Arc<AtomicU32>,
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
            owner_pid: Arc::new(AtomicU32::new(std::process::id())),
        }
    }

    pub async fn connect_redis(dsn: &str, namespace: impl Into<String>) -> Result<Self> {
        let backend = RedisBackend::connect(dsn).await?;
        Ok(Self::new(Arc::new(backend), namespace))
    }

    pub fn in_memory(namespace: impl Into<String>) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), namespace)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.namespace, suffix)
    }

    /// Reconnect when the owning pid changed since this store was created.
    /// Called by the worker after spawning isolated children; a forked child
    /// must not reuse its parent's connection.
    pub async fn reconnect_if_forked(&self) -> Result<bool> {
        let current = std::process::id();
        if self.owner_pid.swap(current, Ordering::SeqCst) == current {
            return Ok(false);
        }
        self.backend.reconnect().await?;
        Ok(true)
    }

    pub async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        self.backend.rpush(&self.key(key), value).await
    }

    pub async fn lpop(&self, key: &str) -> Result<Option<String>> {
        self.backend.lpop(&self.key(key)).await
    }

    pub async fn llen(&self, key: &str) -> Result<i64> {
        self.backend.llen(&self.key(key)).await
    }

    pub async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        self.backend.sadd(&self.key(key), member).await
    }

    pub async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        self.backend.srem(&self.key(key), member).await
    }

    pub async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.backend.smembers(&self.key(key)).await
    }

    pub async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.backend.sismember(&self.key(key), member).await
    }

    pub async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        self.backend.hset_all(&self.key(key), fields).await
    }

    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.backend.hgetall(&self.key(key)).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.backend.get(&self.key(key)).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.backend.set(&self.key(key), value).await
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        self.backend.set_ex(&self.key(key), value, ttl_seconds).await
    }

    pub async fn set_nx(&self, key: &str, value: &str) -> Result<bool> {
        self.backend.set_nx(&self.key(key), value).await
    }

    pub async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.backend.incr_by(&self.key(key), delta).await
    }

    pub async fn decr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.backend.decr_by(&self.key(key), delta).await
    }

    pub async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<bool> {
        self.backend.expire(&self.key(key), ttl_seconds).await
    }

    pub async fn del(&self, key: &str) -> Result<bool> {
        self.backend.del(&self.key(key)).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.backend.exists(&self.key(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_lists_are_fifo() {
        let store = Store::in_memory("test");
        store.rpush("jobs", "a").await.unwrap();
        store.rpush("jobs", "b").await.unwrap();
        store.rpush("jobs", "c").await.unwrap();
        assert_eq!(store.llen("jobs").await.unwrap(), 3);
        assert_eq!(store.lpop("jobs").await.unwrap(), Some("a".to_string()));
        assert_eq!(store.lpop("jobs").await.unwrap(), Some("b".to_string()));
        assert_eq!(store.lpop("jobs").await.unwrap(), Some("c".to_string()));
        assert_eq!(store.lpop("jobs").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_sets_and_hashes() {
        let store = Store::in_memory("test");
        assert!(store.sadd("workers", "w1").await.unwrap());
        assert!(!store.sadd("workers", "w1").await.unwrap());
        assert!(store.sismember("workers", "w1").await.unwrap());
        assert_eq!(store.smembers("workers").await.unwrap(), vec!["w1"]);
        assert!(store.srem("workers", "w1").await.unwrap());
        assert!(!store.srem("workers", "w1").await.unwrap());

        store
            .hset_all(
                "worker:w1",
                &[
                    ("queue".to_string(), "default".to_string()),
                    ("payload".to_string(), "{}".to_string()),
                ],
            )
            .await
            .unwrap();
        let hash = store.hgetall("worker:w1").await.unwrap();
        assert_eq!(hash.get("queue").map(String::as_str), Some("default"));
        assert!(store.del("worker:w1").await.unwrap());
        assert!(store.hgetall("worker:w1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_counters_and_nx() {
        let store = Store::in_memory("test");
        assert_eq!(store.incr_by("stat:processed", 1).await.unwrap(), 1);
        assert_eq!(store.incr_by("stat:processed", 4).await.unwrap(), 5);
        assert_eq!(store.decr_by("stat:processed", 2).await.unwrap(), 3);
        assert_eq!(
            store.get("stat:processed").await.unwrap(),
            Some("3".to_string())
        );

        assert!(store.set_nx("scheduler", "123").await.unwrap());
        assert!(!store.set_nx("scheduler", "456").await.unwrap());
        assert_eq!(store.get("scheduler").await.unwrap(), Some("123".to_string()));
    }

    #[tokio::test]
    async fn memory_expiry_is_honored() {
        let store = Store::in_memory("test");
        store.set_ex("token", "WAITING", 1).await.unwrap();
        assert!(store.exists("token").await.unwrap());
        // Non-positive TTL removes immediately.
        store.set("gone", "x").await.unwrap();
        assert!(store.expire("gone", 0).await.unwrap());
        assert!(!store.exists("gone").await.unwrap());
        assert!(!store.expire("never-existed", 10).await.unwrap());
    }

    #[tokio::test]
    async fn namespacing_isolates_stores_on_shared_backend() {
        let backend = Arc::new(MemoryBackend::new());
        let first = Store::new(backend.clone(), "one");
        let second = Store::new(backend, "two");
        first.set("key", "value").await.unwrap();
        assert_eq!(second.get("key").await.unwrap(), None);
        assert_eq!(first.get("key").await.unwrap(), Some("value".to_string()));
    }

    #[tokio::test]
    async fn reconnect_if_forked_is_a_noop_for_same_pid() {
        let store = Store::in_memory("test");
        assert!(!store.reconnect_if_forked().await.unwrap());
    }

    #[tokio::test]
    #[ignore = "needs a live Redis server"]
    async fn redis_backend_round_trips() {
        let dsn = std::env::var("RJQ_TEST_REDIS_DSN")
            .unwrap_or_else(|_| "redis://localhost:6379/0".to_string());
        let namespace = format!("rjq-test-{}", uuid::Uuid::new_v4());
        let store = Store::connect_redis(&dsn, namespace).await.unwrap();

        store.rpush("queue:jobs", "a").await.unwrap();
        store.rpush("queue:jobs", "b").await.unwrap();
        assert_eq!(store.llen("queue:jobs").await.unwrap(), 2);
        assert_eq!(
            store.lpop("queue:jobs").await.unwrap(),
            Some("a".to_string())
        );

        assert!(store.sadd("workers", "w1").await.unwrap());
        assert!(store.sismember("workers", "w1").await.unwrap());

        store
            .hset_all(
                "worker:w1",
                &[("queue".to_string(), "jobs".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(
            store.hgetall("worker:w1").await.unwrap().get("queue"),
            Some(&"jobs".to_string())
        );

        assert_eq!(store.incr_by("stat:processed", 2).await.unwrap(), 2);
        store.set_ex("token", "x", 30).await.unwrap();
        assert!(store.exists("token").await.unwrap());
        assert!(!store.reconnect_if_forked().await.unwrap());

        for key in ["queue:jobs", "workers", "worker:w1", "stat:processed", "token"] {
            store.del(key).await.unwrap();
        }
    }

    #[tokio::test]
    async fn clones_share_backend_state() {
        let store = Store::in_memory("test");
        let clone = store.clone();
        store.rpush("queue:default", "job").await.unwrap();
        assert_eq!(
            clone.lpop("queue:default").await.unwrap(),
            Some("job".to_string())
        );
    }
}
