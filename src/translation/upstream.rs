//! # Upstream Session
//!
//! Owns the outbound half of one engine stream and is the only code that
//! writes to it. It sequences the handshake and frames every outbound event.
//!
//! ## State machine:
//! ```text
//! Idle ──start_session──▶ Starting ──(system block sent)──▶ ActiveNoAudio
//! ActiveNoAudio ──start_audio_input──▶ ActiveWithAudio
//! ActiveWithAudio ──end_audio_input──▶ Ending
//! any open state ──end_session──▶ Closed
//! ```
//!
//! ## Ordering:
//! All sends go through one `tokio::sync::Mutex`, which doubles as the send
//! lock: the client main loop and the teardown path may both call in, and
//! their events reach the engine in the order the lock was taken.
//!
//! ## Identifiers:
//! One prompt name per session. A fresh content name for each content
//! block; the audio block's name is forgotten as soon as its `contentEnd` is
//! sent, so no later event can reference it.

use crate::error::SessionError;
use crate::translation::events::{encode, OutboundEvent};
use crate::translation::languages::translation_instruction;
use crate::translation::session::Session;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, trace};
use uuid::Uuid;

/// How long a closing event may wait for room in the outbound buffer.
pub const CLOSING_SEND_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamState {
    Idle,
    Starting,
    ActiveNoAudio,
    ActiveWithAudio,
    Ending,
    Closed,
}

struct Inner {
    state: UpstreamState,
    outbound: Option<mpsc::Sender<String>>,
    audio_content_name: Option<String>,
}

pub struct UpstreamSession {
    session: Arc<Session>,
    prompt_name: String,
    inner: Mutex<Inner>,
}

impl UpstreamSession {
    pub fn new(session: Arc<Session>, outbound: mpsc::Sender<String>) -> Self {
        Self {
            session,
            prompt_name: Uuid::new_v4().to_string(),
            inner: Mutex::new(Inner {
                state: UpstreamState::Idle,
                outbound: Some(outbound),
                audio_content_name: None,
            }),
        }
    }

    pub fn prompt_name(&self) -> &str {
        &self.prompt_name
    }

    #[cfg(test)]
    pub async fn state(&self) -> UpstreamState {
        self.inner.lock().await.state
    }

    /// Send `sessionStart`, `promptStart` and the system instruction block.
    ///
    /// The instruction names both languages by display name; unknown tags
    /// are used as-is.
    pub async fn start_session(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        expect_state(&inner, UpstreamState::Idle, "start_session")?;
        inner.state = UpstreamState::Starting;

        let content_name = Uuid::new_v4().to_string();
        let instruction = translation_instruction(&self.session.source_lang, &self.session.target_lang);
        let handshake = [
            OutboundEvent::session_start(),
            OutboundEvent::prompt_start(&self.prompt_name),
            OutboundEvent::system_content_start(&self.prompt_name, &content_name),
            OutboundEvent::text_input(&self.prompt_name, &content_name, &instruction),
            OutboundEvent::content_end(&self.prompt_name, &content_name),
        ];
        for event in &handshake {
            send(&mut inner, &self.session, event).await?;
        }

        inner.state = UpstreamState::ActiveNoAudio;
        info!(
            session_id = %self.session.id,
            source = %self.session.source_lang,
            target = %self.session.target_lang,
            "Upstream handshake sent"
        );
        Ok(())
    }

    /// Open the interactive USER audio block with a new content name.
    pub async fn start_audio_input(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        expect_state(&inner, UpstreamState::ActiveNoAudio, "start_audio_input")?;

        let content_name = Uuid::new_v4().to_string();
        send(
            &mut inner,
            &self.session,
            &OutboundEvent::audio_content_start(&self.prompt_name, &content_name),
        )
        .await?;

        inner.audio_content_name = Some(content_name);
        inner.state = UpstreamState::ActiveWithAudio;
        debug!(session_id = %self.session.id, "Upstream audio block opened");
        Ok(())
    }

    /// Frame one chunk of client PCM as `audioInput`.
    ///
    /// Silently does nothing when the session is no longer active or no audio
    /// block is open: chunks racing teardown are dropped, not reported. Only
    /// a transport failure is an error.
    pub async fn send_audio_chunk(&self, pcm: &[u8]) -> Result<(), SessionError> {
        if !self.session.is_active() {
            trace!(session_id = %self.session.id, bytes = pcm.len(), "Dropping audio, session inactive");
            return Ok(());
        }

        let mut inner = self.inner.lock().await;
        let content_name = match (&inner.state, &inner.audio_content_name) {
            (UpstreamState::ActiveWithAudio, Some(name)) => name.clone(),
            (UpstreamState::Closed, _) => return Err(SessionError::SessionClosed),
            (state, _) => {
                trace!(session_id = %self.session.id, ?state, "Dropping audio, no open audio block");
                return Ok(());
            }
        };

        let event = OutboundEvent::audio_input(&self.prompt_name, &content_name, pcm);
        send(&mut inner, &self.session, &event).await
    }

    /// Close the audio block. No-op unless an audio block is open.
    pub async fn end_audio_input(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            UpstreamState::ActiveWithAudio => {
                inner.state = UpstreamState::Ending;
                close_audio_block(&mut inner, &self.prompt_name, &self.session).await
            }
            UpstreamState::Closed => Err(SessionError::SessionClosed),
            _ => Ok(()),
        }
    }

    /// Send `promptEnd` and `sessionEnd`, then close the outbound half.
    ///
    /// Closes a still-open audio block first. Idempotent: once `Closed`
    /// further calls do nothing. The stream is closed even if a final send
    /// fails; that failure is still returned.
    pub async fn end_session(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        let result = match inner.state {
            UpstreamState::Closed => return Ok(()),
            // Nothing was ever announced to the engine.
            UpstreamState::Idle => Ok(()),
            _ => self.send_closing_events(&mut inner).await,
        };

        inner.state = UpstreamState::Closed;
        inner.outbound = None;
        inner.audio_content_name = None;
        info!(session_id = %self.session.id, "Upstream session closed");
        result
    }

    async fn send_closing_events(&self, inner: &mut Inner) -> Result<(), SessionError> {
        if inner.audio_content_name.is_some() {
            close_audio_block(inner, &self.prompt_name, &self.session).await?;
        }
        send(inner, &self.session, &OutboundEvent::prompt_end(&self.prompt_name)).await?;
        send(inner, &self.session, &OutboundEvent::session_end()).await
    }
}

fn expect_state(inner: &Inner, expected: UpstreamState, operation: &str) -> Result<(), SessionError> {
    match inner.state {
        state if state == expected => Ok(()),
        UpstreamState::Closed => Err(SessionError::SessionClosed),
        state => Err(SessionError::InvalidState(format!("{} called in state {:?}", operation, state))),
    }
}

async fn close_audio_block(inner: &mut Inner, prompt_name: &str, session: &Session) -> Result<(), SessionError> {
    let result = match inner.audio_content_name.take() {
        Some(content_name) => send(inner, session, &OutboundEvent::content_end(prompt_name, &content_name)).await,
        None => Ok(()),
    };
    debug!(session_id = %session.id, "Upstream audio block closed");
    result
}

/// Frame and queue one event for the engine.
///
/// While the session is active a full outbound buffer makes this wait, which
/// keeps events ordered. Once it is inactive only closing events are sent and
/// each gets [`CLOSING_SEND_TIMEOUT`]: an engine that stopped reading must not
/// hold teardown up.
async fn send(inner: &mut Inner, session: &Session, event: &OutboundEvent) -> Result<(), SessionError> {
    let outbound = inner.outbound.as_ref().ok_or(SessionError::SessionClosed)?;
    let frame = encode(event)?;
    let closed = |_| SessionError::UpstreamWrite(format!("stream closed while sending {}", event.name()));

    if session.is_active() {
        outbound.send(frame).await.map_err(closed)?;
    } else {
        tokio::time::timeout(CLOSING_SEND_TIMEOUT, outbound.send(frame))
            .await
            .map_err(|_| SessionError::UpstreamWrite(format!("engine not reading, dropped {}", event.name())))?
            .map_err(closed)?;
    }
    trace!(session_id = %session.id, event = event.name(), "Sent upstream event");
    Ok(())
}
