//! # Upstream Transport
//!
//! The core never touches a socket. It sees the engine as an [`UpstreamChannel`]:
//! a sender for outbound event envelopes and a receiver for inbound ones, one
//! JSON document per item.
//!
//! - Dropping `outbound` closes the outbound half of the stream.
//! - `inbound` yielding `None` means the engine closed its side.
//!
//! [`connect`] backs the channel with a WebSocket to the streaming bridge in
//! front of the engine. `UpstreamChannel::pair` backs it with memory, which is
//! what tests use to play the engine.

use crate::config::UpstreamConfig;
use crate::error::SessionError;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

pub struct UpstreamChannel {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

/// The engine's side of an in-memory [`UpstreamChannel`].
#[cfg(test)]
pub struct EngineEnd {
    /// Envelopes the server sent, in order; `None` once the server closed its half.
    pub received: mpsc::Receiver<String>,
    /// Push envelopes to the server. Drop to end the upstream stream.
    pub send: mpsc::Sender<String>,
}

#[cfg(test)]
impl UpstreamChannel {
    pub fn pair(capacity: usize) -> (UpstreamChannel, EngineEnd) {
        let (outbound, received) = mpsc::channel(capacity);
        let (send, inbound) = mpsc::channel(capacity);
        (UpstreamChannel { outbound, inbound }, EngineEnd { received, send })
    }
}

/// Open the upstream stream for one session.
///
/// ## What this does:
/// 1. Connects to `config.endpoint`, passing model, region and session id as
///    query parameters, within `connect_timeout_ms`
/// 2. Spawns a writer task: outbound envelopes → text frames, then a `Close`
///    frame once every outbound sender is dropped
/// 3. Spawns a reader task: text frames → inbound envelopes, until the bridge
///    closes or errors
///
/// ## Errors:
/// `SessionError::UpstreamConnect` if the handshake fails or times out.
pub async fn connect(config: &UpstreamConfig, session_id: &str) -> Result<UpstreamChannel, SessionError> {
    let url = stream_url(config, session_id);
    info!(session_id = %session_id, endpoint = %config.endpoint, "Connecting to upstream engine");

    let (stream, _response) = tokio::time::timeout(config.connect_timeout(), tokio_tungstenite::connect_async(url.as_str()))
        .await
        .map_err(|_| SessionError::UpstreamConnect(format!("timed out after {}ms", config.connect_timeout_ms)))?
        .map_err(|e| SessionError::UpstreamConnect(e.to_string()))?;

    let (mut ws_tx, mut ws_rx) = stream.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<String>(config.outbound_buffer);
    let (inbound_tx, inbound) = mpsc::channel::<String>(config.outbound_buffer);

    let writer_session = session_id.to_string();
    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = ws_tx.send(Message::Text(frame)).await {
                warn!(session_id = %writer_session, "Upstream write failed: {}", e);
                return;
            }
        }
        if let Err(e) = ws_tx.close().await {
            debug!(session_id = %writer_session, "Upstream close failed: {}", e);
        }
        debug!(session_id = %writer_session, "Upstream outbound half closed");
    });

    let reader_session = session_id.to_string();
    tokio::spawn(async move {
        while let Some(message) = ws_rx.next().await {
            let frame = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        warn!(session_id = %reader_session, "Dropping non-UTF-8 upstream frame");
                        continue;
                    }
                },
                Ok(Message::Close(frame)) => {
                    debug!(session_id = %reader_session, "Upstream closed: {:?}", frame);
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!(session_id = %reader_session, "Upstream read failed: {}", e);
                    break;
                }
            };

            if inbound_tx.send(frame).await.is_err() {
                // Router is gone, nobody is listening anymore.
                break;
            }
        }
    });

    Ok(UpstreamChannel { outbound, inbound })
}

fn stream_url(config: &UpstreamConfig, session_id: &str) -> String {
    let separator = if config.endpoint.contains('?') { '&' } else { '?' };
    format!(
        "{}{}model={}&region={}&session={}",
        config.endpoint, separator, config.model_id, config.region, session_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_stream_url_carries_model_region_and_session() {
        let config = AppConfig::default().upstream;
        assert_eq!(
            stream_url(&config, "abc"),
            "ws://127.0.0.1:9000/v1/stream?model=amazon.nova-sonic-v1:0&region=us-east-1&session=abc"
        );

        let mut config = config;
        config.endpoint = "wss://bridge.example/stream?tenant=un".to_string();
        assert!(stream_url(&config, "abc").starts_with("wss://bridge.example/stream?tenant=un&model="));
    }

    #[tokio::test]
    async fn test_pair_closes_when_outbound_dropped() {
        let (channel, mut engine) = UpstreamChannel::pair(4);
        channel.outbound.send("frame".to_string()).await.unwrap();
        drop(channel);

        assert_eq!(engine.received.recv().await.as_deref(), Some("frame"));
        assert_eq!(engine.received.recv().await, None);
    }

    #[tokio::test]
    async fn test_connect_failure_is_upstream_connect() {
        let mut config = AppConfig::default().upstream;
        // Port 9 (discard) is not listening on test machines.
        config.endpoint = "ws://127.0.0.1:9/v1/stream".to_string();
        config.connect_timeout_ms = 500;

        let result = connect(&config, "abc").await;
        assert!(matches!(result, Err(SessionError::UpstreamConnect(_))));
    }
}
