pub mod connectors;
pub mod transport;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use crate::observability::metrics::{TICKS_DROPPED, TICKS_RECEIVED};
use crate::types::tick::Tick;

/// Sending half of the in-process tick bus.
///
/// Transports only ever see this handle, never the ingestion pipeline.
/// A full bus drops the tick rather than stalling the socket reader.
#[derive(Clone)]
pub struct TickSender {
    tx: mpsc::Sender<Tick>,
}

impl TickSender {
    /// Returns whether the tick was queued.
    pub fn emit(&self, tick: Tick) -> bool {
        TICKS_RECEIVED.inc();
        match self.tx.try_send(tick) {
            Ok(()) => true,
            Err(TrySendError::Full(tick)) => {
                TICKS_DROPPED.inc();
                tracing::warn!(pair = %tick.pair, "Tick bus full, dropping tick");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Tick bus closed");
                false
            }
        }
    }
}

pub fn tick_bus(capacity: usize) -> (TickSender, mpsc::Receiver<Tick>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (TickSender { tx }, rx)
}
