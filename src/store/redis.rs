use std::time::Duration;
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use crate::error::{Error, Result};
use crate::store::{ChannelMessage, MessageStream, SharedStore};

const RENEW_IF_HELD: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

const DELETE_IF_HELD: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::StoreError(e.to_string())
    }
}

/// Redis-backed shared store. Commands share one multiplexed connection;
/// each pattern subscription opens its own pub/sub connection.
pub struct RedisStore {
    client: Client,
    conn: MultiplexedConnection,
    renew_script: Script,
    delete_script: Script,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        tracing::info!(url = %url, "Connected to Redis");

        Ok(RedisStore {
            client,
            conn,
            renew_script: Script::new(RENEW_IF_HELD),
            delete_script: Script::new(DELETE_IF_HELD),
        })
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    ttl.as_millis().max(1) as u64
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn renew(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let renewed: i64 = self.renew_script
            .key(key)
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self.delete_script
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(*field).arg(value.as_str());
        }

        let mut conn = self.conn.clone();
        cmd.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let receivers: usize = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(receivers)
    }

    async fn psubscribe(&self, pattern: &str) -> Result<MessageStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(pattern).await?;
        tracing::info!(pattern = %pattern, "Pattern subscription established");

        let stream = pubsub.into_on_message()
            .filter_map(|msg| {
                let message = match msg.get_payload::<String>() {
                    Ok(payload) => Some(ChannelMessage {
                        channel: msg.get_channel_name().to_string(),
                        payload,
                    }),
                    Err(e) => {
                        tracing::debug!(error = %e, "Dropping non-text pub/sub payload");
                        None
                    }
                };
                futures::future::ready(message)
            })
            .boxed();
        Ok(stream)
    }
}
