pub mod coinapi;
pub mod reconnect;
pub mod simulated;

use async_trait::async_trait;
use tokio::time::Instant;
use crate::error::Result;

/// One upstream transport connection that emits ticks on the tick bus.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TickSource: Send + Sync {
    /// Open the connection and start emitting. Resets any exhausted retry
    /// budget.
    async fn connect(&self) -> Result<()>;

    /// Close the connection without scheduling a reconnect. Idempotent.
    async fn disconnect(&self);

    fn is_socket_open(&self) -> bool;

    fn last_heartbeat(&self) -> Option<Instant>;

    fn source_id(&self) -> &'static str;
}
