//! JSON wire messages for the realtime AI protocol.
//!
//! Event names follow the dotted-type grammar of the realtime API; audio
//! rides base64-encoded inside JSON text frames.

use serde::{Deserialize, Serialize};

/// G.711 A-law format tag used in both directions of the session.
pub const AUDIO_FORMAT_ALAW: &str = "g711_alaw";

/// Voice-activity-detection settings declared in `session.update`.
#[derive(Debug, Clone, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub silence_duration_ms: u32,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            kind: "server_vad".to_string(),
            threshold: 0.5,
            silence_duration_ms: 500,
        }
    }
}

/// Body of the one-shot `session.update` sent on connect.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSettings {
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub voice: String,
    pub turn_detection: TurnDetection,
}

impl SessionSettings {
    pub fn alaw_with_voice(voice: &str) -> Self {
        Self {
            input_audio_format: AUDIO_FORMAT_ALAW.to_string(),
            output_audio_format: AUDIO_FORMAT_ALAW.to_string(),
            voice: voice.to_string(),
            turn_detection: TurnDetection::default(),
        }
    }
}

/// Messages the bridge sends to the AI.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Declares formats, voice, and VAD once on connect.
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSettings },

    /// One RTP packet's worth of caller audio, base64 A-law.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },

    /// Call announcement when fronting an AI server directly.
    #[serde(rename = "session.start")]
    SessionStart {
        call_id: String,
        caller_phone: String,
        format: String,
        sample_rate: u32,
    },

    /// The caller has heard the last frame of the current response.
    #[serde(rename = "playout.complete")]
    PlayoutComplete {},
}

/// Messages the bridge consumes from the AI.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated,

    #[serde(rename = "session.updated")]
    SessionUpdated,

    /// A chunk of bot audio, base64 A-law.
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta {
        #[serde(default)]
        delta: String,
    },

    /// The AI finished generating the current response.
    #[serde(rename = "response.done")]
    ResponseDone,

    /// The AI's VAD heard the caller start speaking: barge-in.
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: serde_json::Value,
    },
}
