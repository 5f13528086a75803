use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use crate::config::upstream::UpstreamConfig;
use crate::error::{Error, Result};
use crate::observability::metrics::UPSTREAM_RECONNECTS;
use crate::price_infra::connectors::reconnect::{CloseAction, ReconnectPolicy, ABNORMAL_CLOSE};
use crate::price_infra::connectors::TickSource;
use crate::price_infra::TickSender;
use crate::types::pair::CurrencyPair;
use crate::types::tick::Tick;
use crate::utils::helper::lock;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SOURCE_ID: &str = "coinapi";

/// Primary vendor adapter speaking the CoinAPI exchange-rate stream.
pub struct CoinApiSource {
    inner: Arc<Inner>,
}

struct Session {
    writer: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
}

struct Inner {
    config: UpstreamConfig,
    pairs: Vec<CurrencyPair>,
    ticks: TickSender,
    socket_open: AtomicBool,
    last_heartbeat: Mutex<Option<Instant>>,
    policy: Mutex<ReconnectPolicy>,
    session: tokio::sync::Mutex<Option<Session>>,
    /// Bumped on every open and disconnect; readers and pending retries
    /// from an older generation stand down.
    generation: AtomicU64,
}

#[derive(Serialize)]
struct Hello<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    apikey: &'a str,
    subscribe_filter_asset_id: Vec<String>,
    subscribe_update_limit_ms: u64,
    heartbeat: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum VendorFrame {
    Heartbeat,
    Exrate(ExrateFrame),
}

#[derive(Debug, Deserialize)]
struct ExrateFrame {
    time: DateTime<Utc>,
    asset_id_base: String,
    asset_id_quote: String,
    rate: f64,
}

fn parse_frame(text: &str) -> Option<VendorFrame> {
    serde_json::from_str(text).ok()
}

impl CoinApiSource {
    pub fn new(config: UpstreamConfig, ticks: TickSender) -> Self {
        let pairs = config.pairs();
        let policy = ReconnectPolicy::new(config.max_retries, config.retry_delay());
        CoinApiSource {
            inner: Arc::new(Inner {
                config,
                pairs,
                ticks,
                socket_open: AtomicBool::new(false),
                last_heartbeat: Mutex::new(None),
                policy: Mutex::new(policy),
                session: tokio::sync::Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }
}

impl Inner {
    fn hello(&self) -> Hello<'_> {
        Hello {
            kind: "hello",
            apikey: &self.config.api_key,
            subscribe_filter_asset_id: self.pairs.iter().map(|p| p.to_string()).collect(),
            subscribe_update_limit_ms: self.config.update_limit_ms,
            heartbeat: true,
        }
    }

    /// Boxed so the reader task can reopen the connection it belongs to.
    ///
    /// The generation only advances once the new socket is live, so a failed
    /// attempt leaves pending retries valid. A disconnect that lands while
    /// the handshake is in flight wins and the new socket is closed.
    fn open(self: &Arc<Self>) -> BoxFuture<'static, Result<()>> {
        let this = Arc::clone(self);
        async move {
            let start = this.generation.load(Ordering::SeqCst);
            this.close_session().await;

            let connect_timeout = this.config.connect_timeout();
            let (mut writer, reader) = match timeout(connect_timeout, this.handshake()).await {
                Ok(Ok(halves)) => halves,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(source_id = SOURCE_ID, timeout_ms = this.config.connect_timeout_ms, "Upstream connect timed out");
                    return Err(Error::ConnectTimeout(connect_timeout));
                }
            };

            // Hold the slot while spawning so a reader that closes at once
            // cannot race the session being stored.
            let mut slot = this.session.lock().await;
            if this.generation
                .compare_exchange(start, start + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                drop(slot);
                let _ = writer.send(Message::Close(None)).await;
                return Err(Error::ConnectionClosed);
            }
            let generation = start + 1;

            this.socket_open.store(true, Ordering::SeqCst);
            *lock(&this.last_heartbeat) = Some(Instant::now());
            let reader = tokio::spawn(Inner::read_loop(Arc::clone(&this), reader, generation));
            *slot = Some(Session { writer, reader });
            drop(slot);

            info!(source_id = SOURCE_ID, pairs = this.pairs.len(), "Connected to upstream");
            Ok(())
        }
        .boxed()
    }

    async fn handshake(&self) -> Result<(SplitSink<WsStream, Message>, SplitStream<WsStream>)> {
        let (ws_stream, _) = connect_async(self.config.url.as_str())
            .await
            .map_err(|e| Error::WebSocketError(format!("WebSocket connection failed: {}", e)))?;
        let (mut writer, reader) = ws_stream.split();

        let hello = serde_json::to_string(&self.hello())
            .map_err(|e| Error::SerializationError(e.to_string()))?;
        writer.send(Message::Text(hello))
            .await
            .map_err(|e| Error::WebSocketError(e.to_string()))?;
        Ok((writer, reader))
    }

    async fn close_session(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.reader.abort();
        }
        self.socket_open.store(false, Ordering::SeqCst);
    }

    async fn read_loop(this: Arc<Self>, mut reader: SplitStream<WsStream>, generation: u64) {
        let mut close_code = ABNORMAL_CLOSE;

        while let Some(message) = reader.next().await {
            match message {
                Ok(Message::Text(text)) => this.handle_text(&text),
                Ok(Message::Close(frame)) => {
                    close_code = frame.map(|f| u16::from(f.code)).unwrap_or(ABNORMAL_CLOSE);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(source_id = SOURCE_ID, error = %e, "Upstream socket error");
                    break;
                }
            }
        }

        this.on_closed(generation, close_code).await;
    }

    fn handle_text(&self, text: &str) {
        match parse_frame(text) {
            Some(VendorFrame::Heartbeat) => {
                *lock(&self.last_heartbeat) = Some(Instant::now());
                lock(&self.policy).reset();
            }
            Some(VendorFrame::Exrate(frame)) => {
                if !frame.asset_id_base.eq_ignore_ascii_case(&self.config.base_currency) {
                    return;
                }
                if !frame.rate.is_finite() || frame.rate <= 0.0 {
                    debug!(rate = frame.rate, "Ignoring non-positive rate");
                    return;
                }
                let pair = CurrencyPair::new(&frame.asset_id_base, &frame.asset_id_quote);
                self.ticks.emit(Tick::new(pair, frame.rate, frame.time));
            }
            None => {}
        }
    }

    async fn on_closed(self: &Arc<Self>, generation: u64, code: u16) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        // Detach rather than abort: this runs on the reader task itself.
        drop(self.session.lock().await.take());
        self.socket_open.store(false, Ordering::SeqCst);

        match self.reconnect(generation, code).await {
            Ok(()) => {}
            Err(e @ Error::MaxReconnectAttemptsExceeded { .. }) => {
                error!(source_id = SOURCE_ID, code, error = %e, "Upstream unhealthy until reconnected");
            }
            Err(e) => debug!(source_id = SOURCE_ID, error = %e, "Reconnect abandoned"),
        }
    }

    async fn reconnect(self: &Arc<Self>, generation: u64, code: u16) -> Result<()> {
        let mut code = code;
        loop {
            let action = lock(&self.policy).on_close(code);
            match action {
                CloseAction::Stop => {
                    info!(source_id = SOURCE_ID, code, "Upstream closed normally");
                    return Ok(());
                }
                CloseAction::GiveUp => {
                    let attempts = lock(&self.policy).attempts();
                    return Err(Error::MaxReconnectAttemptsExceeded { attempts });
                }
                CloseAction::Retry { attempt, delay } => {
                    UPSTREAM_RECONNECTS.inc();
                    warn!(
                        source_id = SOURCE_ID,
                        code,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Upstream closed abnormally, reconnecting"
                    );
                    tokio::time::sleep(delay).await;

                    if self.generation.load(Ordering::SeqCst) != generation {
                        return Err(Error::ConnectionClosed);
                    }
                    match self.open().await {
                        Ok(()) => return Ok(()),
                        Err(Error::ConnectionClosed) => return Err(Error::ConnectionClosed),
                        Err(e) => {
                            warn!(source_id = SOURCE_ID, error = %e, "Reconnect failed");
                            code = ABNORMAL_CLOSE;
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl TickSource for CoinApiSource {
    async fn connect(&self) -> Result<()> {
        // Supersede any retry loop still running for an older socket.
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.policy).reset();
        self.inner.open().await
    }

    async fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.socket_open.store(false, Ordering::SeqCst);

        if let Some(mut session) = self.inner.session.lock().await.take() {
            let close = Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "client disconnect".into(),
            }));
            if let Err(e) = session.writer.send(close).await {
                debug!(source_id = SOURCE_ID, error = %e, "Close frame not delivered");
            }
            session.reader.abort();
            info!(source_id = SOURCE_ID, "Disconnected from upstream");
        }
    }

    fn is_socket_open(&self) -> bool {
        self.inner.socket_open.load(Ordering::SeqCst)
    }

    fn last_heartbeat(&self) -> Option<Instant> {
        *lock(&self.inner.last_heartbeat)
    }

    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }
}
