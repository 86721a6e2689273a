use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::output_data_format::{ConnectionState, FeedEvent, Tick};
use super::FeedConfig;
use crate::decimal::parse_price;
use crate::error::{ConnectionError, MessageParseError};
use crate::retry::Backoff;

/// The two fields of a `<symbol>@ticker` frame we care about.
#[derive(Deserialize, Debug)]
pub struct BinanceTickerMessage {
    #[serde(rename = "s")]
    pub symbol: Option<String>,
    /// Last price, quoted as a decimal string.
    #[serde(rename = "c")]
    pub last_price: Option<String>,
}

#[derive(Deserialize, Debug)]
struct BinanceApiError {
    code: i32,
    msg: String,
}

#[derive(Deserialize, Debug)]
struct BinanceApiErrorMessage {
    error: BinanceApiError,
}

pub const BINANCE_API_BASE_URL: &str = "wss://stream.binance.com:9443/ws";
pub const DEFAULT_SYMBOLS: [&str; 3] = ["btcusdt", "adausdt", "ethusdt"];

// Maximal age of connection is 24 hours
const BINANCE_CONNECTION_AGE_LIMIT_SECONDS: u64 = 24 * 60 * 60;
pub const BINANCE_RECONNECTION_FREQUENCY_SECONDS: u64 = BINANCE_CONNECTION_AGE_LIMIT_SECONDS - 60;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type FeedSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Decodes one text frame into a normalized tick.
pub fn decode_frame(data: &[u8], observed_at: DateTime<Utc>) -> Result<Tick, MessageParseError> {
    let message: BinanceTickerMessage = serde_json::from_slice(data)?;
    message.into_tick(observed_at)
}

impl BinanceTickerMessage {
    /// Binance quotes are stamped with local receipt time, not exchange time.
    pub fn into_tick(self, observed_at: DateTime<Utc>) -> Result<Tick, MessageParseError> {
        let symbol = match self.symbol {
            Some(symbol) if !symbol.trim().is_empty() => symbol,
            _ => return Err(MessageParseError::MissingSymbol),
        };
        let last_price = self.last_price.ok_or(MessageParseError::MissingPrice)?;
        let price = parse_price(&last_price)?;

        Ok(Tick::new(&symbol, price, observed_at))
    }
}

fn log_rejected_frame(frame: &str, error: &MessageParseError) {
    match serde_json::from_str::<BinanceApiErrorMessage>(frame) {
        Ok(error_message) => warn!(
            code = error_message.error.code,
            msg = %error_message.error.msg,
            "Error from Binance API"
        ),
        Err(_) => debug!(%error, %frame, "Dropping malformed ticker frame"),
    }
}

/// Builds a raw-stream URL subscribing to `<symbol>@ticker` for each symbol.
pub fn ticker_stream_url(base_url: &str, symbols: &[String]) -> Result<Url, url::ParseError> {
    let streams = symbols
        .iter()
        .map(|symbol| format!("{}@ticker", symbol.to_lowercase()))
        .collect::<Vec<_>>()
        .join("/");

    Url::parse(&format!("{}/{}", base_url.trim_end_matches('/'), streams))
}

enum SessionEnd {
    Cancelled,
    ConsumerGone,
    Expired,
    Dropped(ConnectionError),
}

/// Tick Source Adapter for the Binance 24h ticker stream.
///
/// Runs `Disconnected -> Connecting -> Connected -> Disconnected -> ...`
/// until the cancellation token fires, then reports `Stopped`. Ticks that
/// arrive while disconnected are simply never seen.
#[derive(Debug, Clone)]
pub struct BinanceTickerSource {
    url: Url,
    backoff: Backoff,
    connection_age_limit: Duration,
}

impl BinanceTickerSource {
    pub fn new(url: Url, backoff: Backoff, connection_age_limit: Duration) -> Self {
        Self {
            url,
            backoff,
            connection_age_limit,
        }
    }

    pub fn from_config(config: &FeedConfig) -> Result<Self, url::ParseError> {
        let url = ticker_stream_url(&config.base_url, &config.symbols)?;
        Ok(Self::new(url, config.backoff, config.connection_age_limit))
    }

    pub fn spawn(
        self,
        tx: flume::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(tx, cancel).await })
    }

    pub async fn run(self, tx: flume::Sender<FeedEvent>, cancel: CancellationToken) {
        let mut attempt: u32 = 0;

        loop {
            if !emit(&tx, &cancel, FeedEvent::State(ConnectionState::Connecting)).await {
                break;
            }
            info!(url = %self.url, attempt, "Connecting to Binance ticker stream");

            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = connect_async(self.url.as_str()) => result,
            };

            let mut reconnect_immediately = false;
            match connected {
                Ok((mut socket, _)) => {
                    attempt = 0;
                    if !emit(&tx, &cancel, FeedEvent::State(ConnectionState::Connected)).await {
                        close_socket(&mut socket).await;
                        break;
                    }
                    info!(url = %self.url, "Connected to Binance ticker stream");

                    match self.read_session(&mut socket, &tx, &cancel).await {
                        SessionEnd::Cancelled | SessionEnd::ConsumerGone => {
                            info!("Unsubscribing from Binance ticker stream");
                            close_socket(&mut socket).await;
                            break;
                        }
                        SessionEnd::Expired => {
                            info!("Binance API connection is too old. Reconnecting...");
                            close_socket(&mut socket).await;
                            reconnect_immediately = true;
                        }
                        SessionEnd::Dropped(error) => {
                            warn!(%error, "Binance ticker stream dropped");
                        }
                    }
                }
                Err(error) => {
                    let error = ConnectionError::Connect(error);
                    warn!(%error, attempt, "Can't connect to Binance API");
                }
            }

            if !emit(&tx, &cancel, FeedEvent::State(ConnectionState::Disconnected)).await {
                break;
            }
            if reconnect_immediately {
                continue;
            }

            let delay = self.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let _ = tx.try_send(FeedEvent::State(ConnectionState::Stopped));
        info!("Binance ticker stream stopped");
    }

    async fn read_session(
        &self,
        socket: &mut FeedSocket,
        tx: &flume::Sender<FeedEvent>,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let expiry = tokio::time::sleep(self.connection_age_limit);
        tokio::pin!(expiry);

        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                _ = &mut expiry => return SessionEnd::Expired,
                frame = socket.next() => frame,
            };

            let message = match frame {
                Some(Ok(message)) => message,
                Some(Err(error)) => return SessionEnd::Dropped(ConnectionError::Io(error)),
                None => return SessionEnd::Dropped(ConnectionError::RemoteClosed),
            };

            let event = match message {
                Message::Text(text) => match decode_frame(text.as_bytes(), Utc::now()) {
                    Ok(tick) => FeedEvent::Tick(tick),
                    Err(error) => {
                        log_rejected_frame(&text, &error);
                        FeedEvent::ParseFailed(error)
                    }
                },
                Message::Binary(_) => FeedEvent::ParseFailed(MessageParseError::NonText),
                Message::Ping(payload) => {
                    // if we don't answer, the server drops us ten minutes after the PING
                    if let Err(error) = socket.send(Message::Pong(payload)).await {
                        return SessionEnd::Dropped(ConnectionError::Io(error));
                    }
                    continue;
                }
                Message::Close(_) => return SessionEnd::Dropped(ConnectionError::RemoteClosed),
                Message::Pong(_) | Message::Frame(_) => continue,
            };

            if !emit(tx, cancel, event).await {
                return if cancel.is_cancelled() {
                    SessionEnd::Cancelled
                } else {
                    SessionEnd::ConsumerGone
                };
            }
        }
    }
}

/// Sends an event, giving up if the consumer is gone or the token fires.
/// A full channel suspends the caller, which in turn stops socket reads.
async fn emit(tx: &flume::Sender<FeedEvent>, cancel: &CancellationToken, event: FeedEvent) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send_async(event) => sent.is_ok(),
    }
}

async fn close_socket(socket: &mut FeedSocket) {
    match tokio::time::timeout(CLOSE_TIMEOUT, socket.close(None)).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => debug!(%error, "Error closing Binance ticker stream"),
        Err(_) => debug!("Timed out closing Binance ticker stream"),
    }
}
