use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tokio_util::sync::CancellationToken;

use price_aggregator_server::data_sources::{
    ticker_stream_url, BinanceTickerSource, ConnectionState, FeedConfig, FeedEvent,
};
use price_aggregator_server::ingestion::{self, IngestionConfig};
use price_aggregator_server::retry::Backoff;
use price_aggregator_server::store::MemoryTickStore;
use ConnectionState::*;

#[derive(Debug, PartialEq)]
enum Seen {
    State(ConnectionState),
    Tick(String, Decimal),
    ParseFailed,
}

impl From<FeedEvent> for Seen {
    fn from(event: FeedEvent) -> Self {
        match event {
            FeedEvent::State(state) => Seen::State(state),
            FeedEvent::Tick(tick) => Seen::Tick(tick.symbol, tick.price),
            FeedEvent::ParseFailed(_) => Seen::ParseFailed,
        }
    }
}

fn source(addr: SocketAddr, backoff: Backoff, age_limit: Duration) -> BinanceTickerSource {
    let url = ticker_stream_url(&format!("ws://{addr}"), &["btcusdt".to_string()]).unwrap();
    BinanceTickerSource::new(url, backoff, age_limit)
}

async fn next(rx: &flume::Receiver<FeedEvent>) -> Seen {
    tokio::time::timeout(Duration::from_secs(5), rx.recv_async())
        .await
        .expect("feed went quiet")
        .expect("feed closed")
        .into()
}

async fn accept(listener: &TcpListener) -> WebSocketStream<tokio::net::TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    accept_async(stream).await.unwrap()
}

async fn send_text(socket: &mut WebSocketStream<tokio::net::TcpStream>, text: &str) {
    socket.send(Message::Text(text.to_string())).await.unwrap();
}

async fn drain(socket: &mut WebSocketStream<tokio::net::TcpStream>) {
    while let Some(Ok(_)) = socket.next().await {}
}

fn tick(price: i64) -> Seen {
    Seen::Tick("BTCUSDT".to_string(), Decimal::from(price))
}

#[tokio::test]
async fn reconnects_after_remote_close_without_duplicates() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut first = accept(&listener).await;
        send_text(&mut first, r#"{"s":"BTCUSDT","c":"100"}"#).await;
        send_text(&mut first, r#"{"s":"BTCUSDT","c":"oops"}"#).await;
        let _ = first.close(None).await;
        drop(first);

        let mut second = accept(&listener).await;
        send_text(&mut second, r#"{"s":"BTCUSDT","c":"101"}"#).await;
        drain(&mut second).await;
    });

    let (tx, rx) = flume::bounded(64);
    let cancel = CancellationToken::new();
    let backoff = Backoff::Fixed(Duration::from_millis(10));
    let handle = source(addr, backoff, Duration::from_secs(3600)).spawn(tx, cancel.clone());

    let mut seen = Vec::new();
    for _ in 0..8 {
        seen.push(next(&rx).await);
    }

    assert_eq!(
        seen,
        vec![
            Seen::State(Connecting),
            Seen::State(Connected),
            tick(100),
            Seen::ParseFailed,
            Seen::State(Disconnected),
            Seen::State(Connecting),
            Seen::State(Connected),
            tick(101),
        ]
    );

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("adapter did not stop")
        .unwrap();

    let rest: Vec<Seen> = rx.drain().map(Seen::from).collect();
    assert_eq!(rest, vec![Seen::State(Stopped)]);

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not see the close")
        .unwrap();
}

#[tokio::test]
async fn cancellation_interrupts_reconnect_backoff() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let (tx, rx) = flume::bounded(64);
    let cancel = CancellationToken::new();
    let backoff = Backoff::Fixed(Duration::from_secs(3600));
    let handle = source(addr, backoff, Duration::from_secs(3600)).spawn(tx, cancel.clone());

    assert_eq!(next(&rx).await, Seen::State(Connecting));
    assert_eq!(next(&rx).await, Seen::State(Disconnected));

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("backoff ignored cancellation")
        .unwrap();

    assert_eq!(next(&rx).await, Seen::State(Stopped));
}

#[tokio::test]
async fn aged_connection_is_replaced_immediately() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut first = accept(&listener).await;
        drain(&mut first).await;

        let mut second = accept(&listener).await;
        send_text(&mut second, r#"{"s":"BTCUSDT","c":"7"}"#).await;
        drain(&mut second).await;
    });

    let (tx, rx) = flume::bounded(64);
    let cancel = CancellationToken::new();
    // a blind backoff here would stall the test
    let backoff = Backoff::Fixed(Duration::from_secs(3600));
    let handle = source(addr, backoff, Duration::from_millis(300)).spawn(tx, cancel.clone());

    let mut seen = Vec::new();
    for _ in 0..6 {
        seen.push(next(&rx).await);
    }

    assert_eq!(
        seen,
        vec![
            Seen::State(Connecting),
            Seen::State(Connected),
            Seen::State(Disconnected),
            Seen::State(Connecting),
            Seen::State(Connected),
            tick(7),
        ]
    );

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("adapter did not stop")
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not see the close")
        .unwrap();
}

#[tokio::test]
async fn ticks_flow_from_socket_into_store() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        send_text(&mut socket, r#"{"s":"BTCUSDT","c":"100.5"}"#).await;
        send_text(&mut socket, r#"{"s":"ETHUSDT","c":"2000"}"#).await;
        send_text(&mut socket, r#"{"s":"BTCUSDT","c":"101.5"}"#).await;
        drain(&mut socket).await;
    });

    let feed = FeedConfig {
        base_url: format!("ws://{addr}"),
        symbols: vec!["btcusdt".to_string(), "ethusdt".to_string()],
        buffer: 4,
        backoff: Backoff::Fixed(Duration::from_millis(10)),
        connection_age_limit: Duration::from_secs(3600),
    };
    let store = Arc::new(MemoryTickStore::new());
    let cancel = CancellationToken::new();
    let handle =
        ingestion::spawn(&feed, store.clone(), IngestionConfig::default(), &cancel).unwrap();

    for _ in 0..250 {
        if store.len("BTCUSDT").await == 2 && store.len("ETHUSDT").await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let stats = handle
        .shutdown(Duration::from_secs(5))
        .await
        .expect("ingestion did not shut down");

    assert_eq!(stats.ticks_persisted, 3);
    assert_eq!(stats.reconnects, 0);
    assert_eq!(store.len("BTCUSDT").await, 2);
    // shutdown only stops ingestion, not the caller's token
    assert!(!cancel.is_cancelled());

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not see the close")
        .unwrap();
}
