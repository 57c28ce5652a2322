//! # Duplex Forwarder
//!
//! Two drain loops, one per queue, that deliver router output to the client:
//!
//! - **audio**: every PCM chunk becomes one binary frame
//! - **transcripts**: displayable entries become `transcript` messages
//!
//! Each loop waits on its queue and on the session going inactive at the same
//! time, so it exits as soon as teardown starts rather than after a poll
//! interval. The inactive branch is checked first: once the flag is down,
//! nothing more is written even if the queue still holds items.
//!
//! The loops are independent. Audio and transcripts keep their own order,
//! but the client may see either one first for the same moment.

use crate::error::SessionError;
use crate::translation::messages::ServerMessage;
use crate::translation::router::TranscriptEvent;
use crate::translation::session::Session;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Where a session's output goes. Implemented by the WebSocket actor address
/// in production and by channels in tests.
///
/// Writes must not block: implementations enqueue and return. A write error
/// means the client is gone.
pub trait DownstreamSink: Clone + Send + Sync + 'static {
    fn send_audio(&self, pcm: Vec<u8>) -> Result<(), SessionError>;

    fn send_message(&self, message: &ServerMessage) -> Result<(), SessionError>;

    /// Close the client connection.
    fn close(&self);
}

pub async fn forward_audio<S: DownstreamSink>(
    session: Arc<Session>,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
    sink: S,
) {
    loop {
        tokio::select! {
            biased;
            _ = session.inactive() => break,
            chunk = queue.recv() => {
                let Some(pcm) = chunk else { break };
                trace!(session_id = %session.id, bytes = pcm.len(), "Forwarding audio");
                if let Err(e) = sink.send_audio(pcm) {
                    session.fail(e);
                    break;
                }
            }
        }
    }
    debug!(session_id = %session.id, "Audio forwarder stopped");
}

pub async fn forward_transcripts<S: DownstreamSink>(
    session: Arc<Session>,
    mut queue: mpsc::UnboundedReceiver<TranscriptEvent>,
    sink: S,
) {
    loop {
        tokio::select! {
            biased;
            _ = session.inactive() => break,
            entry = queue.recv() => {
                let Some(entry) = entry else { break };
                if !entry.display {
                    trace!(session_id = %session.id, "Suppressing speculative transcript");
                    continue;
                }
                let Some(message) = ServerMessage::transcript(entry.role, &entry.text) else {
                    continue;
                };
                if let Err(e) = sink.send_message(&message) {
                    session.fail(e);
                    break;
                }
            }
        }
    }
    debug!(session_id = %session.id, "Transcript forwarder stopped");
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// What a [`ChannelSink`] delivered, in order.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Delivered {
        Audio(Vec<u8>),
        Message(serde_json::Value),
        Closed,
    }

    /// Sink that records deliveries on a channel; fails once the receiver is dropped.
    #[derive(Clone)]
    pub struct ChannelSink(pub mpsc::UnboundedSender<Delivered>);

    impl ChannelSink {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivered>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (ChannelSink(tx), rx)
        }
    }

    impl DownstreamSink for ChannelSink {
        fn send_audio(&self, pcm: Vec<u8>) -> Result<(), SessionError> {
            self.0.send(Delivered::Audio(pcm)).map_err(|_| SessionError::DownstreamDisconnect)
        }

        fn send_message(&self, message: &ServerMessage) -> Result<(), SessionError> {
            let json = serde_json::from_str(&message.to_json()).expect("server messages are JSON");
            self.0.send(Delivered::Message(json)).map_err(|_| SessionError::DownstreamDisconnect)
        }

        fn close(&self) {
            let _ = self.0.send(Delivered::Closed);
        }
    }
}
