//! # Event Codec
//!
//! Builds and parses the JSON event envelopes spoken by the upstream engine.
//! Every envelope has the shape `{"event": {"<eventName>": {<fields>}}}`.
//!
//! ## Outbound (server → engine):
//! `sessionStart`, `promptStart`, `contentStart`, `textInput`, `audioInput`,
//! `contentEnd`, `promptEnd`, `sessionEnd`
//!
//! ## Inbound (engine → server):
//! `contentStart` (role + optional generation stage), `textOutput`,
//! `audioOutput`. Anything else decodes to [`InboundEvent::Unknown`] so a new
//! engine event never fails a session.
//!
//! Encoding is pure: the caller passes the prompt and content names it wants
//! referenced, no session state is read or mutated here.

use crate::error::SessionError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const INPUT_SAMPLE_RATE_HZ: u32 = 16_000;
pub const OUTPUT_SAMPLE_RATE_HZ: u32 = 24_000;
const SAMPLE_SIZE_BITS: u32 = 16;
const CHANNEL_COUNT: u32 = 1;
const LPCM: &str = "audio/lpcm";
const TEXT_PLAIN: &str = "text/plain";
const SPECULATIVE_STAGE: &str = "SPECULATIVE";

/// Who a content block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    /// Parse the engine's role string. Unknown roles yield `None`.
    pub fn from_wire(role: &str) -> Option<Self> {
        match role.to_ascii_uppercase().as_str() {
            "SYSTEM" => Some(Role::System),
            "USER" => Some(Role::User),
            "ASSISTANT" => Some(Role::Assistant),
            "TOOL" => Some(Role::Tool),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn as_wire(&self) -> &'static str {
        match self {
            Role::System => "SYSTEM",
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
            Role::Tool => "TOOL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentType {
    Text,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfiguration {
    pub max_tokens: u32,
    pub top_p: f64,
    pub temperature: f64,
}

impl Default for InferenceConfiguration {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            top_p: 0.9,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConfiguration {
    pub media_type: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConfiguration {
    pub media_type: &'static str,
    pub sample_rate_hertz: u32,
    pub sample_size_bits: u32,
    pub channel_count: u32,
}

impl AudioConfiguration {
    fn lpcm(sample_rate_hertz: u32) -> Self {
        Self {
            media_type: LPCM,
            sample_rate_hertz,
            sample_size_bits: SAMPLE_SIZE_BITS,
            channel_count: CHANNEL_COUNT,
        }
    }
}

/// Fields of an outbound `contentStart`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStart {
    pub prompt_name: String,
    pub content_name: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub interactive: bool,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_input_configuration: Option<MediaConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_input_configuration: Option<AudioConfiguration>,
}

/// Events this server sends to the engine.
///
/// Serialized externally tagged, so `OutboundEvent::PromptEnd { .. }` becomes
/// `{"promptEnd": {"promptName": ".."}}` inside the envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutboundEvent {
    SessionStart {
        inference_configuration: InferenceConfiguration,
    },
    PromptStart {
        prompt_name: String,
        text_output_configuration: MediaConfiguration,
        audio_output_configuration: AudioConfiguration,
    },
    ContentStart(ContentStart),
    TextInput {
        prompt_name: String,
        content_name: String,
        content: String,
    },
    /// `content` is already base64; audio payloads are never logged.
    AudioInput {
        prompt_name: String,
        content_name: String,
        content: String,
    },
    ContentEnd {
        prompt_name: String,
        content_name: String,
    },
    PromptEnd {
        prompt_name: String,
    },
    SessionEnd {},
}

impl OutboundEvent {
    pub fn session_start() -> Self {
        OutboundEvent::SessionStart {
            inference_configuration: InferenceConfiguration::default(),
        }
    }

    pub fn prompt_start(prompt_name: &str) -> Self {
        OutboundEvent::PromptStart {
            prompt_name: prompt_name.to_string(),
            text_output_configuration: MediaConfiguration { media_type: TEXT_PLAIN },
            audio_output_configuration: AudioConfiguration::lpcm(OUTPUT_SAMPLE_RATE_HZ),
        }
    }

    /// Opening of the non-interactive system instruction block.
    pub fn system_content_start(prompt_name: &str, content_name: &str) -> Self {
        OutboundEvent::ContentStart(ContentStart {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: ContentType::Text,
            interactive: false,
            role: Role::System,
            text_input_configuration: Some(MediaConfiguration { media_type: TEXT_PLAIN }),
            audio_input_configuration: None,
        })
    }

    /// Opening of the interactive user audio block (16 kHz LPCM).
    pub fn audio_content_start(prompt_name: &str, content_name: &str) -> Self {
        OutboundEvent::ContentStart(ContentStart {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: ContentType::Audio,
            interactive: true,
            role: Role::User,
            text_input_configuration: None,
            audio_input_configuration: Some(AudioConfiguration::lpcm(INPUT_SAMPLE_RATE_HZ)),
        })
    }

    pub fn text_input(prompt_name: &str, content_name: &str, text: &str) -> Self {
        OutboundEvent::TextInput {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content: text.to_string(),
        }
    }

    pub fn audio_input(prompt_name: &str, content_name: &str, pcm: &[u8]) -> Self {
        OutboundEvent::AudioInput {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content: STANDARD.encode(pcm),
        }
    }

    pub fn content_end(prompt_name: &str, content_name: &str) -> Self {
        OutboundEvent::ContentEnd {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
        }
    }

    pub fn prompt_end(prompt_name: &str) -> Self {
        OutboundEvent::PromptEnd {
            prompt_name: prompt_name.to_string(),
        }
    }

    pub fn session_end() -> Self {
        OutboundEvent::SessionEnd {}
    }

    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::SessionStart { .. } => "sessionStart",
            OutboundEvent::PromptStart { .. } => "promptStart",
            OutboundEvent::ContentStart(_) => "contentStart",
            OutboundEvent::TextInput { .. } => "textInput",
            OutboundEvent::AudioInput { .. } => "audioInput",
            OutboundEvent::ContentEnd { .. } => "contentEnd",
            OutboundEvent::PromptEnd { .. } => "promptEnd",
            OutboundEvent::SessionEnd {} => "sessionEnd",
        }
    }
}

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    event: &'a OutboundEvent,
}

/// Serialize an outbound event into its wire envelope.
pub fn encode(event: &OutboundEvent) -> Result<String, SessionError> {
    serde_json::to_string(&OutboundEnvelope { event })
        .map_err(|e| SessionError::UpstreamWrite(format!("failed to encode {}: {}", event.name(), e)))
}

/// Events the engine sends back that this server acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// A new output block begins. `generation_stage` is `FINAL` or
    /// `SPECULATIVE` when the engine announces one.
    ContentStart {
        role: Option<Role>,
        generation_stage: Option<String>,
    },
    TextOutput {
        role: Option<Role>,
        content: String,
    },
    /// `content` is base64 LPCM at 24 kHz, decoded by the router.
    AudioOutput {
        content: String,
    },
    /// Any other event name, ignored downstream.
    Unknown(String),
}

impl InboundEvent {
    pub fn is_speculative(generation_stage: Option<&str>) -> bool {
        generation_stage == Some(SPECULATIVE_STAGE)
    }

    /// Serialize into the wire envelope the engine would send.
    #[cfg(test)]
    pub fn encode(&self) -> String {
        let (name, payload) = match self {
            InboundEvent::ContentStart { role, generation_stage } => {
                let mut fields = Map::new();
                if let Some(role) = role {
                    fields.insert("role".into(), Value::from(role.as_wire()));
                }
                if let Some(stage) = generation_stage {
                    let extra = serde_json::json!({ "generationStage": stage }).to_string();
                    fields.insert("additionalModelFields".into(), Value::from(extra));
                }
                ("contentStart", Value::Object(fields))
            }
            InboundEvent::TextOutput { role, content } => {
                let mut fields = Map::new();
                if let Some(role) = role {
                    fields.insert("role".into(), Value::from(role.as_wire()));
                }
                fields.insert("content".into(), Value::from(content.as_str()));
                ("textOutput", Value::Object(fields))
            }
            InboundEvent::AudioOutput { content } => {
                ("audioOutput", serde_json::json!({ "content": content }))
            }
            InboundEvent::Unknown(name) => (name.as_str(), Value::Object(Map::new())),
        };

        let mut event = Map::new();
        event.insert(name.to_string(), payload);
        serde_json::json!({ "event": event }).to_string()
    }
}

#[derive(Deserialize)]
struct InboundEnvelope {
    event: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireContentStart {
    role: Option<String>,
    additional_model_fields: Option<Value>,
}

#[derive(Deserialize)]
struct WireTextOutput {
    role: Option<String>,
    content: String,
}

#[derive(Deserialize)]
struct WireAudioOutput {
    content: String,
}

/// Parse one inbound wire envelope.
///
/// ## Errors:
/// Returns `SessionError::Decode` when the frame is not JSON, has no `event`
/// object, or a known event is missing required fields. Callers drop that one
/// message and carry on.
pub fn decode(frame: &str) -> Result<InboundEvent, SessionError> {
    let envelope: InboundEnvelope = serde_json::from_str(frame)?;
    let (name, payload) = envelope
        .event
        .into_iter()
        .next()
        .ok_or_else(|| SessionError::Decode("empty event envelope".to_string()))?;

    match name.as_str() {
        "contentStart" => {
            let wire: WireContentStart = serde_json::from_value(payload)?;
            Ok(InboundEvent::ContentStart {
                role: wire.role.as_deref().and_then(Role::from_wire),
                generation_stage: wire.additional_model_fields.as_ref().and_then(generation_stage),
            })
        }
        "textOutput" => {
            let wire: WireTextOutput = serde_json::from_value(payload)?;
            Ok(InboundEvent::TextOutput {
                role: wire.role.as_deref().and_then(Role::from_wire),
                content: wire.content,
            })
        }
        "audioOutput" => {
            let wire: WireAudioOutput = serde_json::from_value(payload)?;
            Ok(InboundEvent::AudioOutput { content: wire.content })
        }
        _ => Ok(InboundEvent::Unknown(name)),
    }
}

/// `additionalModelFields` arrives as a JSON document encoded in a string;
/// a plain object is accepted too.
fn generation_stage(fields: &Value) -> Option<String> {
    let parsed;
    let object = match fields {
        Value::String(raw) => {
            parsed = serde_json::from_str::<Value>(raw).ok()?;
            &parsed
        }
        other => other,
    };

    object
        .get("generationStage")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(event: &OutboundEvent) -> Value {
        serde_json::from_str(&encode(event).unwrap()).unwrap()
    }

    #[test]
    fn test_session_start_inference_configuration() {
        let json = envelope(&OutboundEvent::session_start());
        let config = &json["event"]["sessionStart"]["inferenceConfiguration"];
        assert_eq!(config["maxTokens"], 1024);
        assert!((config["topP"].as_f64().unwrap() - 0.9).abs() < 1e-6);
        assert!((config["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_prompt_start_output_configuration() {
        let json = envelope(&OutboundEvent::prompt_start("prompt-1"));
        let prompt = &json["event"]["promptStart"];
        assert_eq!(prompt["promptName"], "prompt-1");
        assert_eq!(prompt["textOutputConfiguration"]["mediaType"], "text/plain");
        assert_eq!(prompt["audioOutputConfiguration"]["mediaType"], "audio/lpcm");
        assert_eq!(prompt["audioOutputConfiguration"]["sampleRateHertz"], 24000);
        assert_eq!(prompt["audioOutputConfiguration"]["sampleSizeBits"], 16);
        assert_eq!(prompt["audioOutputConfiguration"]["channelCount"], 1);
    }

    #[test]
    fn test_system_content_start_is_not_interactive() {
        let json = envelope(&OutboundEvent::system_content_start("p", "c"));
        let content = &json["event"]["contentStart"];
        assert_eq!(content["type"], "TEXT");
        assert_eq!(content["interactive"], false);
        assert_eq!(content["role"], "SYSTEM");
        assert_eq!(content["textInputConfiguration"]["mediaType"], "text/plain");
        assert!(content.get("audioInputConfiguration").is_none());
    }

    #[test]
    fn test_audio_content_start_uses_16khz_input() {
        let json = envelope(&OutboundEvent::audio_content_start("p", "c"));
        let content = &json["event"]["contentStart"];
        assert_eq!(content["type"], "AUDIO");
        assert_eq!(content["interactive"], true);
        assert_eq!(content["role"], "USER");
        assert_eq!(content["audioInputConfiguration"]["sampleRateHertz"], 16000);
        assert_eq!(content["audioInputConfiguration"]["sampleSizeBits"], 16);
        assert_eq!(content["audioInputConfiguration"]["channelCount"], 1);
        assert!(content.get("textInputConfiguration").is_none());
    }

    #[test]
    fn test_audio_input_is_base64() {
        let json = envelope(&OutboundEvent::audio_input("p", "c", &[0x01, 0x02, 0xff]));
        let audio = &json["event"]["audioInput"];
        assert_eq!(audio["promptName"], "p");
        assert_eq!(audio["contentName"], "c");
        assert_eq!(audio["content"], "AQL/");
    }

    #[test]
    fn test_session_end_is_an_empty_object() {
        let json = envelope(&OutboundEvent::session_end());
        assert_eq!(json, serde_json::json!({ "event": { "sessionEnd": {} } }));
    }

    #[test]
    fn test_decode_speculative_content_start() {
        let frame = r#"{"event":{"contentStart":{"role":"ASSISTANT","type":"TEXT",
            "additionalModelFields":"{\"generationStage\":\"SPECULATIVE\"}"}}}"#;
        match decode(frame).unwrap() {
            InboundEvent::ContentStart { role, generation_stage } => {
                assert_eq!(role, Some(Role::Assistant));
                assert!(InboundEvent::is_speculative(generation_stage.as_deref()));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_generation_stage_as_object() {
        let frame = r#"{"event":{"contentStart":{"role":"ASSISTANT",
            "additionalModelFields":{"generationStage":"FINAL"}}}}"#;
        assert_eq!(
            decode(frame).unwrap(),
            InboundEvent::ContentStart {
                role: Some(Role::Assistant),
                generation_stage: Some("FINAL".to_string()),
            }
        );
    }

    #[test]
    fn test_text_and_audio_output_round_trip() {
        let text = InboundEvent::TextOutput {
            role: Some(Role::User),
            content: "hola a todos".to_string(),
        };
        assert_eq!(decode(&text.encode()).unwrap(), text);

        let pcm: Vec<u8> = (0..=255).collect();
        let audio = InboundEvent::AudioOutput { content: STANDARD.encode(&pcm) };
        match decode(&audio.encode()).unwrap() {
            InboundEvent::AudioOutput { content } => {
                assert_eq!(STANDARD.decode(content).unwrap(), pcm);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_is_not_an_error() {
        let frame = r#"{"event":{"usageEvent":{"totalTokens":42}}}"#;
        assert_eq!(decode(frame).unwrap(), InboundEvent::Unknown("usageEvent".to_string()));
    }

    #[test]
    fn test_malformed_frames_are_decode_errors() {
        for frame in ["not json", r#"{"event":{}}"#, r#"{"other":1}"#, r#"{"event":{"textOutput":{}}}"#] {
            assert!(matches!(decode(frame), Err(SessionError::Decode(_))), "{frame}");
        }
    }
}
