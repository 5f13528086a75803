use std::path::Path;
use std::sync::Mutex;
use async_trait::async_trait;
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use crate::error::{Error, Result};
use crate::types::tick::Tick;
use crate::utils::helper::lock;

/// Durable append-only log of every tick the leader ingests.
#[async_trait]
pub trait RawTickStore: Send + Sync {
    async fn append(&self, tick: &Tick) -> Result<()>;
}

#[derive(Serialize)]
struct RawTickLine<'a> {
    base: &'a str,
    quote: &'a str,
    rate: f64,
    timestamp: String,
}

/// One JSON object per line, appended to a file.
pub struct JsonlTickLog {
    file: tokio::sync::Mutex<File>,
}

impl JsonlTickLog {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        tracing::info!(path = %path.display(), "Opened raw tick log");
        Ok(JsonlTickLog {
            file: tokio::sync::Mutex::new(file),
        })
    }
}

#[async_trait]
impl RawTickStore for JsonlTickLog {
    async fn append(&self, tick: &Tick) -> Result<()> {
        let line = RawTickLine {
            base: &tick.pair.base,
            quote: &tick.pair.quote,
            rate: tick.rate,
            timestamp: tick.timestamp.to_rfc3339(),
        };
        let mut bytes = serde_json::to_vec(&line)
            .map_err(|e| Error::SerializationError(e.to_string()))?;
        bytes.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&bytes)
            .await
            .map_err(|e| Error::RawLogError(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| Error::RawLogError(e.to_string()))
    }
}

/// Keeps appended ticks in memory.
#[derive(Default)]
pub struct MemoryTickLog {
    ticks: Mutex<Vec<Tick>>,
}

impl MemoryTickLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticks(&self) -> Vec<Tick> {
        lock(&self.ticks).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.ticks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RawTickStore for MemoryTickLog {
    async fn append(&self, tick: &Tick) -> Result<()> {
        lock(&self.ticks).push(tick.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::pair::CurrencyPair;

    #[tokio::test]
    async fn jsonl_log_appends_one_line_per_tick() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ticks/raw.jsonl");
        let log = JsonlTickLog::open(&path).await.unwrap();

        let ts = "2024-03-04T10:00:00Z".parse().unwrap();
        log.append(&Tick::new(CurrencyPair::new("USD", "KRW"), 1350.5, ts)).await.unwrap();
        log.append(&Tick::new(CurrencyPair::new("USD", "JPY"), 150.25, ts)).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["quote"], "KRW");
        assert_eq!(first["rate"], 1350.5);
    }
}
