//! Shared key-value store used for the leader lock, the rate cache and
//! change fan-out.
//!
//! Every process in the cluster talks to the same store. Only the
//! set-if-absent primitive is relied on for mutual exclusion; everything
//! else is plain last-writer-wins.

use std::time::Duration;
use async_trait::async_trait;
use futures::stream::BoxStream;
use crate::error::Result;

pub mod memory;
pub mod rate_cache;
#[cfg(feature = "redis-store")]
pub mod redis;

/// One message delivered through a pattern subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelMessage {
    pub channel: String,
    pub payload: String,
}

pub type MessageStream = BoxStream<'static, ChannelMessage>;

#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Atomically set `key` to `value` with a TTL unless it already exists.
    /// Returns whether the key was set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Reset the TTL of `key` if it still holds `value`.
    async fn renew(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Delete `key` only if it holds `value`.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Set a subset of hash fields, leaving the others untouched.
    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()>;

    /// Read a subset of hash fields, `None` for each missing field.
    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>>;

    /// Returns the number of subscribers that received the message.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize>;

    /// Subscribe to every channel matching a glob `pattern`.
    async fn psubscribe(&self, pattern: &str) -> Result<MessageStream>;
}
