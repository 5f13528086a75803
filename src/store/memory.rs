use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use crate::error::{Error, Result};
use crate::store::{ChannelMessage, MessageStream, SharedStore};
use crate::utils::helper::glob_match;

const BUS_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Clone, Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Single-process store with the same semantics as the Redis backend.
///
/// Clones of an `Arc<MemoryStore>` stand in for a cluster sharing one
/// store. Expiry follows the tokio clock, so paused-time tests can drive
/// lock TTLs deterministically.
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    bus: broadcast::Sender<ChannelMessage>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        MemoryStore {
            entries: DashMap::new(),
            bus,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: every operation fails until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::StoreError("store unavailable".to_string()));
        }
        Ok(())
    }

    fn live_value(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;
        if entry.is_expired(now) {
            drop(entry);
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            return None;
        }
        Some(entry.value.clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check_available()?;
        let now = Instant::now();
        let fresh = Entry {
            value: Value::Str(value.to_string()),
            expires_at: Some(now + ttl),
        };

        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(fresh);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn renew(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check_available()?;
        let now = Instant::now();
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(false);
        };

        let held = !entry.is_expired(now)
            && matches!(&entry.value, Value::Str(current) if current == value);
        if held {
            entry.expires_at = Some(now + ttl);
        }
        Ok(held)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        match self.live_value(key) {
            Some(Value::Str(value)) => Ok(Some(value)),
            Some(Value::Hash(_)) => Err(Error::StoreError(format!("{} holds a hash", key))),
            None => Ok(None),
        }
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        self.check_available()?;
        let now = Instant::now();
        let removed = self.entries.remove_if(key, |_, entry| {
            !entry.is_expired(now) && matches!(&entry.value, Value::Str(v) if v == value)
        });
        Ok(removed.is_some())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_available()?;
        self.entries.insert(key.to_string(), Entry {
            value: Value::Str(value.to_string()),
            expires_at: None,
        });
        Ok(())
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        self.check_available()?;
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });

        if entry.is_expired(now) {
            *entry = Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            };
        }

        match &mut entry.value {
            Value::Hash(hash) => {
                for (field, value) in fields {
                    hash.insert(field.to_string(), value.clone());
                }
                Ok(())
            }
            Value::Str(_) => Err(Error::StoreError(format!("{} holds a string", key))),
        }
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
        self.check_available()?;
        match self.live_value(key) {
            Some(Value::Hash(hash)) => Ok(fields.iter().map(|f| hash.get(*f).cloned()).collect()),
            Some(Value::Str(_)) => Err(Error::StoreError(format!("{} holds a string", key))),
            None => Ok(vec![None; fields.len()]),
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        self.check_available()?;
        let message = ChannelMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        Ok(self.bus.send(message).unwrap_or(0))
    }

    async fn psubscribe(&self, pattern: &str) -> Result<MessageStream> {
        self.check_available()?;
        let pattern = pattern.to_string();
        let stream = BroadcastStream::new(self.bus.subscribe())
            .filter_map(move |message| {
                let matched = match message {
                    Ok(message) if glob_match(&pattern, &message.channel) => Some(message),
                    Ok(_) => None,
                    Err(e) => {
                        tracing::warn!(error = %e, "Pattern subscriber lagged, messages lost");
                        None
                    }
                };
                futures::future::ready(matched)
            })
            .boxed();
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn set_if_absent_respects_ttl() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);

        assert!(store.set_if_absent("lock", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent("lock", "b", ttl).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("a"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.get("lock").await.unwrap(), None);
        assert!(store.set_if_absent("lock", "b", ttl).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn renew_only_extends_own_lock() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set_if_absent("lock", "a", ttl).await.unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(store.renew("lock", "a", ttl).await.unwrap());
        assert!(!store.renew("lock", "b", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("a"));

        assert!(!store.delete_if_equals("lock", "b").await.unwrap());
        assert!(store.delete_if_equals("lock", "a").await.unwrap());
        assert!(!store.renew("lock", "a", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn hash_partial_writes_keep_other_fields() {
        let store = MemoryStore::new();
        store.hset("h", &[("rate", "1.5".to_string()), ("change", "0".to_string())]).await.unwrap();
        store.hset("h", &[("rate", "1.6".to_string())]).await.unwrap();

        let values = store.hmget("h", &["rate", "change", "missing"]).await.unwrap();
        assert_eq!(values, vec![Some("1.6".to_string()), Some("0".to_string()), None]);
        assert_eq!(store.hmget("absent", &["rate"]).await.unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn pattern_subscription_filters_channels() {
        let store = MemoryStore::new();
        let mut stream = store.psubscribe("rates:*").await.unwrap();

        store.publish("other:USD/KRW", "x").await.unwrap();
        store.publish("rates:USD/KRW", "y").await.unwrap();

        let message = stream.next().await.unwrap();
        assert_eq!(message.channel, "rates:USD/KRW");
        assert_eq!(message.payload, "y");
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(store.set_if_absent("k", "v", Duration::from_secs(1)).await.is_err());
        assert!(store.get("k").await.is_err());
        store.set_unavailable(false);
        assert!(store.get("k").await.unwrap().is_none());
    }
}
