use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use pairwatch_core::{
    AlertField, AlertOp, AlertRuleSpec, ChannelPersist, EngineConfig, PairSpec, PairsEngine,
    PersistEvent, Tick, Timeframe,
};
use serde::Deserialize;
use smol_str::SmolStr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc},
};
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

/// Binance combined trade stream base URL.
/// Full form: wss://stream.binance.com:9443/stream?streams=btcusdt@trade/ethusdt@trade
const DEFAULT_FEED_URL: &str = "wss://stream.binance.com:9443/stream";

/// Reconnect backoff cap for the upstream feed.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// One message of the Binance combined stream wrapper.
#[derive(Debug, Deserialize)]
struct CombinedStreamMessage {
    data: TradePayload,
}

/// Binance trade event. Price and quantity arrive as decimal strings.
#[derive(Debug, Deserialize)]
struct TradePayload {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    init_logging();

    info!("Starting pairwatch WebSocket server");

    let config = load_config();
    let feed_url = build_feed_url(&config);

    // Create broadcast channel for snapshot and alert artifacts
    // Configurable buffer size via WS_BUFFER_SIZE env var (default: 10,000)
    let buffer_size = std::env::var("WS_BUFFER_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10_000);

    info!("WebSocket broadcast buffer size: {}", buffer_size);
    let (outbound_tx, _rx) = broadcast::channel::<PersistEvent>(buffer_size);
    let outbound_tx = Arc::new(outbound_tx);

    // The engine forwards every immutable artifact over this channel; the
    // server relays snapshots and alerts to connected clients.
    let (sink, artifact_rx) = ChannelPersist::new();
    let mut engine =
        PairsEngine::spawn(config, Arc::new(sink)).expect("invalid engine configuration");

    tokio::spawn(forward_artifacts(artifact_rx, Arc::clone(&outbound_tx)));

    // Start WebSocket server
    // Configurable via WS_ADDR env var (default: 0.0.0.0:9001)
    let server_addr_str = std::env::var("WS_ADDR").unwrap_or_else(|_| "0.0.0.0:9001".to_string());
    let server_addr = server_addr_str
        .parse::<SocketAddr>()
        .unwrap_or_else(|_| "0.0.0.0:9001".parse().unwrap());
    let tx_clone = Arc::clone(&outbound_tx);
    tokio::spawn(async move {
        start_websocket_server(server_addr, tx_clone).await;
    });

    info!("WebSocket server listening on ws://{}", server_addr);
    info!("Clients can connect to receive live snapshots and alerts");

    tokio::select! {
        _ = run_feed(&mut engine, feed_url) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    engine.shutdown().await;
}

/// Load the engine configuration from CONFIG_PATH (JSON), or fall back to
/// the built-in btc/eth default.
fn load_config() -> EngineConfig {
    match std::env::var("CONFIG_PATH") {
        Ok(path) => {
            info!("Loading engine configuration from {}", path);
            let raw = std::fs::read_to_string(&path)
                .unwrap_or_else(|err| panic!("failed to read {path}: {err}"));
            EngineConfig::from_json_str(&raw).expect("invalid engine configuration")
        }
        Err(_) => {
            info!("CONFIG_PATH not set, using default configuration");
            default_config()
        }
    }
}

fn default_config() -> EngineConfig {
    let pair = PairSpec {
        symbol_a: SmolStr::new("btcusdt"),
        symbol_b: SmolStr::new("ethusdt"),
        timeframe: Timeframe::from_secs(60),
    };
    EngineConfig {
        timeframes: vec![Timeframe::from_secs(60)],
        window_capacity: 300,
        min_samples: 30,
        recompute_every: 64,
        adf_lags: 1,
        adf_min_samples: 60,
        adf_every: 5,
        max_clock_skew_ms: 120_000,
        bar_history: 1_000,
        pairs: vec![pair.clone()],
        rules: vec![AlertRuleSpec {
            pair,
            field: AlertField::Zscore,
            op: AlertOp::Gt,
            threshold: 2.0,
        }],
    }
}

/// Build the combined trade-stream URL for every distinct symbol the tracked
/// pairs reference.
fn build_feed_url(config: &EngineConfig) -> Url {
    let mut symbols: Vec<&str> = Vec::new();
    for pair in &config.pairs {
        for symbol in [&pair.symbol_a, &pair.symbol_b] {
            if !symbols.contains(&symbol.as_str()) {
                symbols.push(symbol.as_str());
            }
        }
    }

    let base = std::env::var("FEED_URL").unwrap_or_else(|_| DEFAULT_FEED_URL.to_string());
    let mut url = Url::parse(&base).expect("invalid FEED_URL");
    let streams = symbols
        .iter()
        .map(|symbol| format!("{symbol}@trade"))
        .collect::<Vec<_>>()
        .join("/");
    url.set_query(Some(&format!("streams={streams}")));
    url
}

/// Consume the upstream trade feed forever, reconnecting with doubling
/// backoff capped at 30s. The backoff resets after every successful connect.
async fn run_feed(engine: &mut PairsEngine, url: Url) {
    let mut backoff = Duration::from_secs(1);

    loop {
        info!("Connecting to trade feed at {}", url);
        match connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => {
                info!("Trade feed connected");
                backoff = Duration::from_secs(1);

                let (_, mut feed) = ws_stream.split();
                while let Some(message) = feed.next().await {
                    match message {
                        Ok(Message::Text(text)) => handle_feed_message(engine, &text),
                        Ok(Message::Ping(_)) => {
                            // Tungstenite answers pings automatically
                            debug!("Received ping from trade feed");
                        }
                        Ok(Message::Close(frame)) => {
                            warn!("Trade feed closed: {:?}", frame);
                            break;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            error!("Trade feed error: {}", err);
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                error!("Trade feed connection failed: {}", err);
            }
        }

        warn!("Reconnecting to trade feed in {}s", backoff.as_secs());
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Parse one feed message and push it through the engine. Bad messages are
/// logged and dropped without stopping the feed.
fn handle_feed_message(engine: &mut PairsEngine, text: &str) {
    // Combined-stream wrapper, or a bare payload on single-stream endpoints.
    let payload = match serde_json::from_str::<CombinedStreamMessage>(text) {
        Ok(message) => message.data,
        Err(_) => match serde_json::from_str::<TradePayload>(text) {
            Ok(payload) => payload,
            Err(err) => {
                // Subscription acks and other control messages land here.
                debug!("Ignoring non-trade feed message: {}", err);
                return;
            }
        },
    };

    let (Ok(price), Ok(quantity)) = (payload.price.parse::<f64>(), payload.quantity.parse::<f64>())
    else {
        warn!("Unparseable price/quantity in trade for {}", payload.symbol);
        return;
    };
    let time = DateTime::from_timestamp_millis(payload.event_time).unwrap_or_else(Utc::now);
    let tick = Tick::new(time, payload.symbol.to_lowercase(), price, quantity);

    match engine.feed_tick(&tick) {
        Ok(report) => {
            for bar in &report.completed {
                debug!(
                    "Completed bar {}@{} close {} volume {}",
                    bar.symbol, bar.timeframe, bar.close, bar.volume
                );
            }
        }
        Err(err) => {
            warn!("Tick rejected for {}: {}", tick.symbol, err);
        }
    }
}

/// Relay engine artifacts to the client broadcast channel. Bars are kept out
/// of the push feed; clients poll those through the query surface.
async fn forward_artifacts(
    mut rx: mpsc::UnboundedReceiver<PersistEvent>,
    tx: Arc<broadcast::Sender<PersistEvent>>,
) {
    while let Some(event) = rx.recv().await {
        match &event {
            PersistEvent::Bar(_) => continue,
            PersistEvent::Alert(alert) => {
                info!("ALERT {}: {}", alert.pair_id, alert.message);
            }
            PersistEvent::Snapshot(snapshot) => {
                debug!(
                    "Snapshot {} status {:?} samples {}",
                    snapshot.pair_id, snapshot.status, snapshot.sample_count
                );
            }
        }
        // Send errors just mean no client is connected.
        let _ = tx.send(event);
    }
}

/// Start WebSocket server that broadcasts snapshots and alerts to connected clients
async fn start_websocket_server(addr: SocketAddr, tx: Arc<broadcast::Sender<PersistEvent>>) {
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind WebSocket server");

    info!("WebSocket server bound to {}", addr);

    while let Ok((stream, peer_addr)) = listener.accept().await {
        info!("New WebSocket connection from {}", peer_addr);
        let tx = tx.clone();
        tokio::spawn(handle_client(stream, peer_addr, tx));
    }
}

/// Handle individual WebSocket client connection
async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    tx: Arc<broadcast::Sender<PersistEvent>>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", peer_addr, e);
            return;
        }
    };

    info!("WebSocket handshake completed for {}", peer_addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut rx = tx.subscribe();

    // Send welcome message
    let welcome = serde_json::json!({
        "type": "welcome",
        "message": "Connected to pairwatch snapshot feed",
        "timestamp": Utc::now()
    });
    if let Ok(msg) = serde_json::to_string(&welcome) {
        let _ = ws_sender.send(Message::Text(msg.into())).await;
    }

    // Spawn task to send artifacts to this client
    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        if ws_sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Client fell behind; log and continue, don't disconnect
                    warn!("Client {} lagged, skipped {} messages", peer_addr, skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Broadcast channel closed for {}", peer_addr);
                    break;
                }
            }
        }
    });

    // Handle incoming messages from client (e.g., ping/pong)
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) => {
                    debug!("Received ping from {}", peer_addr);
                }
                Ok(Message::Text(text)) => {
                    debug!("Received text from {}: {}", peer_addr, text);
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", peer_addr, e);
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => {
            info!("Send task completed for {}", peer_addr);
        }
        _ = &mut recv_task => {
            info!("Receive task completed for {}", peer_addr);
        }
    }

    info!("WebSocket connection closed for {}", peer_addr);
}

/// Initialize logging
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_payload_parses_combined_stream_message() {
        let raw = r#"{
            "stream": "btcusdt@trade",
            "data": {"e":"trade","E":1700000000123,"s":"BTCUSDT","t":1,"p":"42000.50","q":"0.012"}
        }"#;
        let message: CombinedStreamMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(message.data.symbol, "BTCUSDT");
        assert_eq!(message.data.event_time, 1_700_000_000_123);
        assert_eq!(message.data.price.parse::<f64>().unwrap(), 42_000.50);
        assert_eq!(message.data.quantity.parse::<f64>().unwrap(), 0.012);
    }

    #[test]
    fn test_feed_url_deduplicates_shared_legs() {
        let mut config = default_config();
        config.pairs.push(PairSpec {
            symbol_a: SmolStr::new("btcusdt"),
            symbol_b: SmolStr::new("solusdt"),
            timeframe: Timeframe::from_secs(60),
        });
        let url = build_feed_url(&config);
        assert_eq!(
            url.query(),
            Some("streams=btcusdt@trade/ethusdt@trade/solusdt@trade")
        );
    }
}
