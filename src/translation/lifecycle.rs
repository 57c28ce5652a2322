//! # Session Lifecycle Manager
//!
//! Drives one translation session from handshake to teardown.
//!
//! ## Startup order:
//! 1. `sessionStart`, `promptStart` and the system instruction block
//! 2. the USER audio block
//! 3. the response router and both forwarders, as tasks
//! 4. `ready` to the client
//!
//! `ready` goes out last so the client can't send audio before the upstream
//! audio block exists.
//!
//! ## Main loop:
//! Client frames arrive as [`ClientFrame`]s. Binary frames are PCM for the
//! engine, text frames are control messages. The loop ends on `stop`, on the
//! client going away, or on the session going inactive underneath it.
//!
//! ## Teardown:
//! Deactivate, close the audio block, end the session, cancel the tasks.
//! Runs exactly once whichever way the loop ended; dropping the manager
//! without it still cancels the tasks.

use crate::error::SessionError;
use crate::translation::forwarder::{forward_audio, forward_transcripts, DownstreamSink};
use crate::translation::messages::{ClientControl, ServerMessage};
use crate::translation::router::ResponseRouter;
use crate::translation::session::Session;
use crate::translation::transport::UpstreamChannel;
use crate::translation::upstream::UpstreamSession;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A frame received from the downstream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Text(String),
    Binary(Vec<u8>),
    Closed,
}

/// Why the main loop returned.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopExit {
    /// Client sent `stop`
    Stopped,
    /// Client went away; nothing more is sent to it
    Disconnected,
    Failed(SessionError),
}

pub struct SessionLifecycle<S: DownstreamSink> {
    session: Arc<Session>,
    upstream: UpstreamSession,
    sink: S,
    tasks: Vec<JoinHandle<()>>,
    torn_down: bool,
}

impl<S: DownstreamSink> SessionLifecycle<S> {
    /// Run the startup sequence. On failure whatever was started is torn
    /// down before the error is returned.
    pub async fn start(session: Arc<Session>, channel: UpstreamChannel, sink: S) -> Result<Self, SessionError> {
        let UpstreamChannel { outbound, inbound } = channel;
        let mut lifecycle = Self {
            upstream: UpstreamSession::new(session.clone(), outbound),
            session,
            sink,
            tasks: Vec::with_capacity(3),
            torn_down: false,
        };

        if let Err(e) = lifecycle.launch(inbound).await {
            lifecycle.teardown().await;
            return Err(e);
        }
        Ok(lifecycle)
    }

    async fn launch(&mut self, inbound: mpsc::Receiver<String>) -> Result<(), SessionError> {
        self.upstream.start_session().await?;
        self.upstream.start_audio_input().await?;

        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (transcript_tx, transcript_rx) = mpsc::unbounded_channel();

        let router = ResponseRouter::new(self.session.clone(), audio_tx, transcript_tx);
        self.tasks.push(tokio::spawn(router.run(inbound)));
        self.tasks
            .push(tokio::spawn(forward_audio(self.session.clone(), audio_rx, self.sink.clone())));
        self.tasks.push(tokio::spawn(forward_transcripts(
            self.session.clone(),
            transcript_rx,
            self.sink.clone(),
        )));

        self.sink.send_message(&ServerMessage::ready(
            &self.session.id,
            &self.session.source_lang,
            &self.session.target_lang,
        ))?;
        info!(
            session_id = %self.session.id,
            prompt = %self.upstream.prompt_name(),
            "Session ready"
        );
        Ok(())
    }

    /// Handle client frames until the session should end.
    pub async fn pump(&mut self, frames: &mut mpsc::UnboundedReceiver<ClientFrame>) -> LoopExit {
        // Frames that arrived while an audio send was waiting on the engine.
        let mut backlog = VecDeque::new();
        loop {
            let frame = match backlog.pop_front() {
                Some(frame) => Some(frame),
                None => tokio::select! {
                    biased;
                    _ = self.session.inactive() => return self.inactive_exit(),
                    frame = frames.recv() => frame,
                },
            };

            match frame {
                None | Some(ClientFrame::Closed) => return LoopExit::Disconnected,
                Some(ClientFrame::Binary(pcm)) => {
                    if let Err(exit) = self.send_audio(&pcm, frames, &mut backlog).await {
                        return exit;
                    }
                }
                Some(ClientFrame::Text(text)) => {
                    if let Some(exit) = self.handle_control(&text) {
                        return exit;
                    }
                }
            }
        }
    }

    /// Send one PCM frame upstream.
    ///
    /// A stalled engine makes the send wait. The client is still watched
    /// meanwhile: going inactive or disconnecting ends the wait, and any other
    /// frame is queued on `backlog` in arrival order.
    async fn send_audio(
        &self,
        pcm: &[u8],
        frames: &mut mpsc::UnboundedReceiver<ClientFrame>,
        backlog: &mut VecDeque<ClientFrame>,
    ) -> Result<(), LoopExit> {
        let send = self.upstream.send_audio_chunk(pcm);
        tokio::pin!(send);

        loop {
            tokio::select! {
                biased;
                _ = self.session.inactive() => return Err(self.inactive_exit()),
                result = &mut send => return result.map_err(LoopExit::Failed),
                frame = frames.recv() => match frame {
                    None | Some(ClientFrame::Closed) => return Err(LoopExit::Disconnected),
                    Some(frame) => backlog.push_back(frame),
                },
            }
        }
    }

    fn handle_control(&self, text: &str) -> Option<LoopExit> {
        let reply = match ClientControl::parse(text) {
            Ok(ClientControl::Stop) => {
                info!(session_id = %self.session.id, "Client requested stop");
                return Some(LoopExit::Stopped);
            }
            Ok(ClientControl::Ping) => ServerMessage::Pong,
            Ok(ClientControl::Start) => ServerMessage::status("listening"),
            Ok(ClientControl::Unknown) => {
                debug!(session_id = %self.session.id, "Ignoring unknown control message");
                return None;
            }
            Err(e) => {
                warn!(session_id = %self.session.id, "{}", e);
                ServerMessage::error(e.client_message())
            }
        };

        match self.sink.send_message(&reply) {
            Ok(()) => None,
            Err(_) => Some(LoopExit::Disconnected),
        }
    }

    fn inactive_exit(&self) -> LoopExit {
        match self.session.failure() {
            Some(SessionError::DownstreamDisconnect) => LoopExit::Disconnected,
            Some(e) => LoopExit::Failed(e),
            None => LoopExit::Failed(SessionError::SessionClosed),
        }
    }

    /// Idempotent: only the first call does anything.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.session.deactivate();

        if let Err(e) = self.upstream.end_audio_input().await {
            debug!(session_id = %self.session.id, "Closing audio block: {}", e);
        }
        if let Err(e) = self.upstream.end_session().await {
            warn!(session_id = %self.session.id, "Ending upstream session: {}", e);
        }

        for task in self.tasks.drain(..) {
            task.abort();
            // A cancelled task reports JoinError::Cancelled, which is expected here.
            let _ = task.await;
        }
        info!(session_id = %self.session.id, "Session torn down");
    }
}

impl<S: DownstreamSink> Drop for SessionLifecycle<S> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Serve one client from startup to close.
///
/// The client hears why the session ended unless it was the one that left:
/// `stopped` after a requested stop, an `error` message after a failure.
pub async fn run_session<S: DownstreamSink>(
    session: Arc<Session>,
    channel: UpstreamChannel,
    sink: S,
    mut frames: mpsc::UnboundedReceiver<ClientFrame>,
) -> Result<(), SessionError> {
    let exit = match SessionLifecycle::start(session, channel, sink.clone()).await {
        Ok(mut lifecycle) => {
            let exit = lifecycle.pump(&mut frames).await;
            lifecycle.teardown().await;
            exit
        }
        Err(SessionError::DownstreamDisconnect) => LoopExit::Disconnected,
        Err(e) => LoopExit::Failed(e),
    };

    match exit {
        LoopExit::Stopped => {
            let _ = sink.send_message(&ServerMessage::status("stopped"));
            sink.close();
            Ok(())
        }
        LoopExit::Disconnected => Ok(()),
        LoopExit::Failed(e) => {
            let _ = sink.send_message(&ServerMessage::error(e.client_message()));
            sink.close();
            Err(e)
        }
    }
}
