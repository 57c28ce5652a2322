//! # Response Router
//!
//! Turns the engine's inbound event stream into two queues: raw PCM for the
//! audio forwarder and [`TranscriptEvent`]s for the transcript forwarder.
//!
//! ## Role and stage latch:
//! Every `contentStart` overwrites the latched role and speculative flag.
//! Text that follows is attributed to the latched role. Assistant text is
//! displayable only when the latest `contentStart` was not `SPECULATIVE`;
//! user text is always displayable.
//!
//! ## Failure handling:
//! A frame that fails to decode is logged and dropped. The stream ending, or
//! both queues being gone, deactivates the session and stops the router.

use crate::error::SessionError;
use crate::translation::events::{decode, InboundEvent, Role};
use crate::translation::session::Session;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub role: Role,
    pub text: String,
    pub display: bool,
}

/// Session-scoped state carried from one `contentStart` to the next.
#[derive(Debug, Default)]
struct Latch {
    role: Option<Role>,
    speculative: bool,
}

impl Latch {
    fn display(&self, role: Role) -> bool {
        match role {
            Role::User => true,
            Role::Assistant => !self.speculative,
            Role::System | Role::Tool => false,
        }
    }
}

pub struct ResponseRouter {
    session: Arc<Session>,
    audio: mpsc::UnboundedSender<Vec<u8>>,
    transcripts: mpsc::UnboundedSender<TranscriptEvent>,
    latch: Latch,
}

impl ResponseRouter {
    pub fn new(
        session: Arc<Session>,
        audio: mpsc::UnboundedSender<Vec<u8>>,
        transcripts: mpsc::UnboundedSender<TranscriptEvent>,
    ) -> Self {
        Self {
            session,
            audio,
            transcripts,
            latch: Latch::default(),
        }
    }

    /// Consume inbound envelopes until the stream ends.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<String>) {
        while let Some(frame) = inbound.recv().await {
            match decode(&frame) {
                Ok(event) => {
                    if !self.route(event) {
                        debug!(session_id = %self.session.id, "Output queues closed, router stopping");
                        self.session.deactivate();
                        return;
                    }
                }
                Err(e) => {
                    warn!(session_id = %self.session.id, "Dropping inbound message: {}", e);
                }
            }
        }

        if self.session.is_active() {
            info!(session_id = %self.session.id, "Upstream stream ended");
        }
        self.session.fail(SessionError::UpstreamStreamEnded);
    }

    /// Dispatch one event. Returns `false` once nothing can receive output.
    fn route(&mut self, event: InboundEvent) -> bool {
        match event {
            InboundEvent::ContentStart { role, generation_stage } => {
                self.latch.role = role;
                self.latch.speculative = InboundEvent::is_speculative(generation_stage.as_deref());
                trace!(
                    session_id = %self.session.id,
                    ?role,
                    speculative = self.latch.speculative,
                    "Content block started"
                );
                true
            }
            InboundEvent::TextOutput { role, content } => {
                let Some(role) = self.latch.role.or(role) else {
                    debug!(session_id = %self.session.id, "Dropping text without a role");
                    return true;
                };
                let transcript = TranscriptEvent {
                    role,
                    display: self.latch.display(role),
                    text: content,
                };
                self.transcripts.send(transcript).is_ok() || !self.audio.is_closed()
            }
            InboundEvent::AudioOutput { content } => match STANDARD.decode(content.as_bytes()) {
                Ok(pcm) => self.audio.send(pcm).is_ok() || !self.transcripts.is_closed(),
                Err(e) => {
                    warn!(session_id = %self.session.id, "Dropping undecodable audio output: {}", e);
                    true
                }
            },
            InboundEvent::Unknown(name) => {
                trace!(session_id = %self.session.id, event = %name, "Ignoring inbound event");
                true
            }
        }
    }
}
