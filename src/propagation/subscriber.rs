use std::sync::Arc;
use std::time::Duration;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use crate::error::Result;
use crate::interfaces::change_consumer::ChangeConsumer;
use crate::observability::metrics::CHANGES_PROPAGATED;
use crate::store::rate_cache::RateCacheStore;
use crate::store::{ChannelMessage, MessageStream};
use crate::types::pair::CurrencyPair;
use crate::types::rate::LatestRateRecord;
use crate::utils::task_supervisor::{TaskHandle, TaskSupervisor};

const EVENT_BUFFER: usize = 1024;
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// A rate change as seen by every process in the cluster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateChangeEvent {
    pub pair: CurrencyPair,
    pub record: LatestRateRecord,
}

/// Listens on every pair channel and fans changes out locally.
///
/// Runs on leader and workers alike. A subscription that ends, as a Redis
/// pub/sub connection does when it drops, is reopened after a fixed delay.
pub struct ChangePropagationSubscriber {
    cache: RateCacheStore,
    consumers: Vec<Arc<dyn ChangeConsumer>>,
    events: broadcast::Sender<RateChangeEvent>,
}

impl ChangePropagationSubscriber {
    pub fn new(cache: RateCacheStore, consumers: Vec<Arc<dyn ChangeConsumer>>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Arc::new(ChangePropagationSubscriber {
            cache,
            consumers,
            events,
        })
    }

    /// In-process receiver of every propagated change.
    pub fn subscribe(&self) -> broadcast::Receiver<RateChangeEvent> {
        self.events.subscribe()
    }

    /// Open the pattern subscription, then consume it on a supervised task.
    ///
    /// The subscription is live when this returns.
    pub async fn start(self: &Arc<Self>, supervisor: &TaskSupervisor) -> Result<TaskHandle> {
        let stream = self.cache.subscribe_changes().await?;
        info!(
            namespace = self.cache.namespace(),
            pattern = %self.cache.channel_pattern(),
            "Subscribed to rate changes"
        );

        let this = Arc::clone(self);
        Ok(supervisor.spawn("change-subscriber", async move { this.follow(stream).await }))
    }

    async fn follow(&self, mut stream: MessageStream) {
        loop {
            self.run(stream).await;
            warn!(pattern = %self.cache.channel_pattern(), "Change subscription ended, resubscribing");
            stream = self.resubscribe().await;
        }
    }

    /// Drain one subscription until it ends.
    pub async fn run(&self, mut stream: MessageStream) {
        while let Some(message) = stream.next().await {
            self.handle(message).await;
        }
    }

    async fn resubscribe(&self) -> MessageStream {
        loop {
            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
            match self.cache.subscribe_changes().await {
                Ok(stream) => {
                    info!(pattern = %self.cache.channel_pattern(), "Resubscribed to rate changes");
                    return stream;
                }
                Err(e) => warn!(error = %e, "Resubscribe failed, retrying"),
            }
        }
    }

    async fn handle(&self, message: ChannelMessage) {
        let pair = match self.cache.parse_channel(&message.channel) {
            Ok(pair) => pair,
            Err(e) => {
                debug!(channel = %message.channel, error = %e, "Skipping message");
                return;
            }
        };
        let record: LatestRateRecord = match serde_json::from_str(&message.payload) {
            Ok(record) => record,
            Err(e) => {
                debug!(channel = %message.channel, error = %e, "Skipping undecodable change");
                return;
            }
        };

        CHANGES_PROPAGATED.inc();
        for consumer in &self.consumers {
            consumer.on_rate_change(&pair, &record).await;
        }

        // No local listeners is fine.
        let _ = self.events.send(RateChangeEvent { pair, record });
    }
}
