//! # WebSocket Translation Handler
//!
//! Downstream transport for translation sessions. Clients connect to
//! `/ws/translate?source=en-US&target=es-US` and stream microphone PCM as
//! binary frames; translated speech comes back as binary frames and
//! transcripts as JSON text frames.
//!
//! ## Protocol:
//! 1. **Upgrade**: refused with 503 when every session slot is taken
//! 2. **Handshake**: the server connects upstream and sends `{"type":"status","message":"ready"}`
//! 3. **Streaming**: binary PCM both ways (16 kHz in, 24 kHz out), transcripts as text
//! 4. **Control**: `start`, `stop` and `ping` text messages
//! 5. **Close**: `stop`, a fatal error, or the client leaving ends the session
//!
//! ## Actor + task split:
//! The actor only moves frames. It pushes client frames into a channel and
//! writes whatever the session task sends to its address. The session task
//! runs the translation core (`translation::run_session`) and never touches
//! the actor's context directly.
//!
//! `/ws/echo` is a plain echo endpoint for checking a client's audio path
//! without an engine behind it.

use crate::config::UpstreamConfig;
use crate::error::{AppError, SessionError};
use crate::state::{AppState, SessionPermit};
use crate::translation::transport;
use crate::translation::{run_session, ClientFrame, DownstreamSink, ServerMessage, Session};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Query parameters for `/ws/translate`. Missing tags fall back to the
/// configured defaults; unknown tags are accepted as-is.
#[derive(Debug, Default, Deserialize)]
pub struct TranslateParams {
    pub source: Option<String>,
    pub target: Option<String>,
}

/// One client connection serving one translation session.
pub struct TranslateSocket {
    session: Arc<Session>,
    upstream: UpstreamConfig,
    /// Client frames for the session task
    frames: mpsc::UnboundedSender<ClientFrame>,
    /// Handed to the session task when the actor starts
    pending: Option<(mpsc::UnboundedReceiver<ClientFrame>, SessionPermit)>,
    heartbeat_interval: Duration,
    client_timeout: Duration,
    last_heartbeat: Instant,
}

impl TranslateSocket {
    fn new(session: Session, state: &AppState, permit: SessionPermit) -> Self {
        let config = state.get_config();
        let (frames, frames_rx) = mpsc::unbounded_channel();
        Self {
            session: Arc::new(session),
            upstream: config.upstream.clone(),
            frames,
            pending: Some((frames_rx, permit)),
            heartbeat_interval: config.session.heartbeat_interval(),
            client_timeout: config.session.client_timeout(),
            last_heartbeat: Instant::now(),
        }
    }

    fn forward(&self, frame: ClientFrame) {
        if self.frames.send(frame).is_err() {
            debug!(session_id = %self.session.id, "Session task gone, dropping client frame");
        }
    }

    /// Protocol-level ping; a client silent for too long is dropped.
    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(session_id = %act.session.id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn spawn_session(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let Some((frames, permit)) = self.pending.take() else {
            return;
        };
        let session = self.session.clone();
        let upstream = self.upstream.clone();
        let sink = ActorSink(ctx.address());

        tokio::spawn(async move {
            let session_id = session.id.clone();
            let result = match transport::connect(&upstream, &session_id).await {
                Ok(channel) => run_session(session, channel, sink, frames).await,
                Err(e) => {
                    let _ = sink.send_message(&ServerMessage::error(e.client_message()));
                    sink.close();
                    Err(e)
                }
            };

            match result {
                Ok(()) => info!(session_id = %session_id, "Translation session finished"),
                Err(e) if e.is_fatal() => {
                    permit.mark_failed();
                    error!(session_id = %session_id, "Translation session failed: {}", e);
                }
                Err(e) => warn!(session_id = %session_id, "Translation session ended: {}", e),
            }
            // Permit drops here, releasing the slot.
        });
    }
}

impl Actor for TranslateSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(
            session_id = %self.session.id,
            source = %self.session.source_lang,
            target = %self.session.target_lang,
            "Translation socket opened"
        );
        self.start_heartbeat(ctx);
        self.spawn_session(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(session_id = %self.session.id, "Translation socket closed");
        // Ends the session's main loop if it is still running, including one
        // waiting on a stalled engine.
        self.session.fail(SessionError::DownstreamDisconnect);
        self.forward(ClientFrame::Closed);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TranslateSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.forward(ClientFrame::Text(text.to_string()));
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.forward(ClientFrame::Binary(data.to_vec()));
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(session_id = %self.session.id, "Client closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.session.id, "Ignoring continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.session.id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct SendAudio(Vec<u8>);

#[derive(Message)]
#[rtype(result = "()")]
struct SendText(String);

#[derive(Message)]
#[rtype(result = "()")]
struct CloseSocket;

impl Handler<SendAudio> for TranslateSocket {
    type Result = ();

    fn handle(&mut self, msg: SendAudio, ctx: &mut Self::Context) {
        ctx.binary(msg.0);
    }
}

impl Handler<SendText> for TranslateSocket {
    type Result = ();

    fn handle(&mut self, msg: SendText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl Handler<CloseSocket> for TranslateSocket {
    type Result = ();

    fn handle(&mut self, _msg: CloseSocket, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseCode::Normal.into()));
        ctx.stop();
    }
}

/// [`DownstreamSink`] over the socket actor's address.
#[derive(Clone)]
struct ActorSink(Addr<TranslateSocket>);

impl ActorSink {
    fn connected(&self) -> Result<(), SessionError> {
        if self.0.connected() {
            Ok(())
        } else {
            Err(SessionError::DownstreamDisconnect)
        }
    }
}

// do_send ignores mailbox capacity, so bursts of audio never fail here.
impl DownstreamSink for ActorSink {
    fn send_audio(&self, pcm: Vec<u8>) -> Result<(), SessionError> {
        self.connected()?;
        self.0.do_send(SendAudio(pcm));
        Ok(())
    }

    fn send_message(&self, message: &ServerMessage) -> Result<(), SessionError> {
        self.connected()?;
        self.0.do_send(SendText(message.to_json()));
        Ok(())
    }

    fn close(&self) {
        if self.0.connected() {
            self.0.do_send(CloseSocket);
        }
    }
}

/// `GET /ws/translate` upgrade handler.
///
/// ## Admission:
/// A session slot is taken before the upgrade. When none is free the
/// request fails with 503 and no socket is opened.
pub async fn translate_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
    query: web::Query<TranslateParams>,
) -> Result<HttpResponse, AppError> {
    info!("New translation connection from: {:?}", req.connection_info().peer_addr());

    let permit = app_state.try_acquire_session().ok_or_else(|| {
        AppError::ServiceUnavailable(format!(
            "All {} translation sessions are in use",
            app_state.get_config().session.max_concurrent_sessions
        ))
    })?;

    let params = query.into_inner();
    let defaults = &app_state.get_config().session;
    let session = Session::new(
        params.source.unwrap_or_else(|| defaults.default_source.clone()),
        params.target.unwrap_or_else(|| defaults.default_target.clone()),
    );

    let socket = TranslateSocket::new(session, &app_state, permit);
    Ok(ws::start(socket, &req, stream)?)
}

/// Echoes every frame back; used to test client audio plumbing.
pub struct EchoSocket;

impl Actor for EchoSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        debug!("Echo socket opened");
        ctx.text(ServerMessage::status("echo_ready").to_json());
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for EchoSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => ctx.text(text),
            Ok(ws::Message::Binary(data)) => ctx.binary(data),
            Ok(ws::Message::Ping(data)) => ctx.pong(&data),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(err) => {
                warn!("Echo socket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// `GET /ws/echo` upgrade handler.
pub async fn echo_websocket(req: HttpRequest, stream: web::Payload) -> Result<HttpResponse, AppError> {
    Ok(ws::start(EchoSocket, &req, stream)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App};

    fn state_with_capacity(max: usize) -> AppState {
        let mut config = AppConfig::default();
        config.session.max_concurrent_sessions = max;
        AppState::new(config)
    }

    #[actix_web::test]
    async fn test_translate_params_are_optional() {
        let params = web::Query::<TranslateParams>::from_query("source=fr-FR").unwrap().into_inner();
        assert_eq!(params.source.as_deref(), Some("fr-FR"));
        assert_eq!(params.target, None);
    }

    #[actix_web::test]
    async fn test_upgrade_refused_when_sessions_exhausted() {
        let state = state_with_capacity(1);
        let _held = state.try_acquire_session().unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/ws/translate", web::get().to(translate_websocket)),
        )
        .await;

        let req = test::TestRequest::get().uri("/ws/translate?source=en-US&target=es-US").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::SERVICE_UNAVAILABLE);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "service_unavailable");
        assert_eq!(state.session_snapshot().active, 1);
    }

    #[actix_web::test]
    async fn test_non_upgrade_request_releases_permit() {
        let state = state_with_capacity(2);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/ws/translate", web::get().to(translate_websocket)),
        )
        .await;

        // No Upgrade headers: the handshake fails and the slot is given back.
        let req = test::TestRequest::get().uri("/ws/translate").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_client_error());
        assert_eq!(state.session_snapshot().active, 0);
    }
}
