//! WebSocket client for the conversational AI.
//!
//! IO runs on a shared tokio runtime; the rest of the bridge is plain
//! threads. Two tasks per connection: a writer draining an unbounded
//! outgoing channel (with a 5 s timeout per send), and a reader parsing
//! server events. Bot audio is pushed into an owned single-subscriber
//! channel that the session's egress pump drains, so exactly one pipe can
//! ever consume a call's audio stream.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::ai::messages::{ClientEvent, ServerEvent, SessionSettings};
use crate::codec::Codec;
use crate::error::BridgeError;

/// Outgoing sends slower than this are abandoned; the caller is never held
/// up by AI latency.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

lazy_static! {
    /// Shared tokio runtime for all AI connections.
    static ref RUNTIME: Runtime = Runtime::new().expect("Failed to create tokio runtime");
}

#[cfg(test)]
pub(crate) fn test_runtime() -> &'static Runtime {
    &RUNTIME
}

/// Connection parameters for one call.
#[derive(Debug, Clone)]
pub struct AiClientConfig {
    /// WebSocket endpoint (ws:// or wss://).
    pub url: String,
    /// Voice declared in `session.update`.
    pub voice: String,
    /// Call id for the `session.start` announcement.
    pub call_id: String,
    /// Caller number for the `session.start` announcement.
    pub caller_phone: String,
    /// Announce the call with `session.start` (server-fronting deployments).
    pub announce_session: bool,
}

/// Turn-taking and diagnostic events dispatched off the reader task.
///
/// Response completion is NOT part of this trait: it rides in-band on the
/// audio stream (see [`AudioEvent`]) so it can never overtake audio chunks
/// still queued towards the egress pipe.
pub trait AiEventHandler: Send + Sync {
    /// The AI heard the caller start speaking over the bot.
    fn on_barge_in(&self);
    /// A completed caller-utterance transcription.
    fn on_transcription(&self, transcript: &str) {
        log::info!("caller transcription: {}", transcript);
    }
    /// Protocol-level error from the AI. No automatic reconnect.
    fn on_error(&self, detail: &str) {
        log::error!("AI error event: {}", detail);
    }
}

/// Items on the owned audio stream, in exact server order.
#[derive(Debug, Clone)]
pub enum AudioEvent {
    /// A chunk of bot audio (decoded from base64).
    Chunk(Bytes),
    /// The AI finished generating; everything before this marker is the
    /// complete response audio.
    ResponseDone,
}

/// Client statistics (lock-free atomic updates).
#[derive(Default)]
pub struct AiClientStats {
    pub audio_chunks_sent: AtomicU64,
    /// Sends dropped because the session was not ready yet.
    pub sends_before_ready: AtomicU64,
    pub audio_chunks_received: AtomicU64,
}

/// One call's connection to the AI.
pub struct AiClient {
    outgoing: mpsc::UnboundedSender<Message>,
    session_ready: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    /// Taken once by the session; the egress pump owns it afterwards.
    audio_rx: Mutex<Option<crossbeam_channel::Receiver<AudioEvent>>>,
    stats: Arc<AiClientStats>,
}

impl AiClient {
    /// Connect and spawn the IO tasks.
    ///
    /// Sends the `session.start` announcement (when configured) and the
    /// one-shot `session.update` declaring A-law both ways. Audio pushes are
    /// accepted once the server confirms with `session.created`.
    pub fn connect(
        config: AiClientConfig,
        codec: Codec,
        handler: Arc<dyn AiEventHandler>,
    ) -> Result<Self, BridgeError> {
        let (ws, _response) = RUNTIME
            .block_on(tokio_tungstenite::connect_async(config.url.as_str()))
            .map_err(|e| BridgeError::AiConnect(e.to_string()))?;
        let (ws_sink, ws_stream) = ws.split();

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let (audio_tx, audio_rx) = crossbeam_channel::unbounded::<AudioEvent>();
        let session_ready = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(AiClientStats::default());

        RUNTIME.spawn(writer_task(outgoing_rx, ws_sink));
        RUNTIME.spawn(reader_task(ReaderContext {
            ws_stream,
            handler,
            audio_tx,
            session_ready: session_ready.clone(),
            stats: stats.clone(),
        }));

        let client = Self {
            outgoing,
            session_ready,
            closed,
            audio_rx: Mutex::new(Some(audio_rx)),
            stats,
        };

        if config.announce_session {
            client.send_event(&ClientEvent::SessionStart {
                call_id: config.call_id.clone(),
                caller_phone: config.caller_phone.clone(),
                format: codec.name().to_string(),
                sample_rate: crate::SAMPLE_RATE,
            });
        }
        client.send_event(&ClientEvent::SessionUpdate {
            session: SessionSettings::alaw_with_voice(&config.voice),
        });

        Ok(client)
    }

    /// Take the bot audio stream. Yields `Some` exactly once per call.
    pub fn take_audio_stream(&self) -> Option<crossbeam_channel::Receiver<AudioEvent>> {
        self.audio_rx.lock().take()
    }

    /// Forward one processed ingress payload to the AI.
    ///
    /// Dropped silently until the session is ready and after close; the
    /// ingress path never blocks on the AI.
    pub fn send_audio(&self, alaw: &[u8]) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if !self.session_ready.load(Ordering::SeqCst) {
            self.stats.sends_before_ready.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.send_event(&ClientEvent::InputAudioAppend {
            audio: BASE64.encode(alaw),
        });
        self.stats.audio_chunks_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Tell the AI the caller has heard the end of the current response.
    pub fn notify_playout_complete(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        log::debug!("playout complete, signalling AI");
        self.send_event(&ClientEvent::PlayoutComplete {});
    }

    /// Whether the server has confirmed the session.
    pub fn is_ready(&self) -> bool {
        self.session_ready.load(Ordering::SeqCst)
    }

    /// Close the connection. Safe to call more than once; pending events
    /// after close are no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.outgoing.send(Message::Close(None));
    }

    /// Statistics handle.
    pub fn stats(&self) -> Arc<AiClientStats> {
        self.stats.clone()
    }

    fn send_event(&self, event: &ClientEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                // Unbounded send only fails when the writer task is gone,
                // which means the connection is already down.
                if self.outgoing.send(Message::Text(json)).is_err() {
                    log::debug!("AI connection closed, event dropped");
                }
            }
            Err(e) => log::error!("failed to serialize AI event: {}", e),
        }
    }
}

impl Drop for AiClient {
    fn drop(&mut self) {
        self.close();
    }
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type WsStream = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// Drains the outgoing channel into the socket, one message at a time.
async fn writer_task(mut rx: mpsc::UnboundedReceiver<Message>, mut sink: WsSink) {
    while let Some(msg) = rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        match tokio::time::timeout(SEND_TIMEOUT, sink.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::warn!("AI WebSocket send failed: {}", e);
                break;
            }
            Err(_) => {
                log::warn!("AI WebSocket send timed out after {:?}, abandoned", SEND_TIMEOUT);
            }
        }
        if is_close {
            break;
        }
    }
}

struct ReaderContext {
    ws_stream: WsStream,
    handler: Arc<dyn AiEventHandler>,
    audio_tx: crossbeam_channel::Sender<AudioEvent>,
    session_ready: Arc<AtomicBool>,
    stats: Arc<AiClientStats>,
}

/// Parses server events and dispatches them until the stream ends.
async fn reader_task(mut ctx: ReaderContext) {
    while let Some(msg) = ctx.ws_stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue, // ping/pong/binary
            Err(e) => {
                log::warn!("AI WebSocket receive failed: {}", e);
                break;
            }
        };

        let event = match serde_json::from_str::<ServerEvent>(&text) {
            Ok(event) => event,
            Err(_) => {
                // Protocol events the bridge has no use for.
                log::trace!("unhandled AI event: {}", text);
                continue;
            }
        };

        match event {
            ServerEvent::SessionCreated | ServerEvent::SessionUpdated => {
                ctx.session_ready.store(true, Ordering::SeqCst);
            }
            ServerEvent::ResponseAudioDelta { delta } => match BASE64.decode(&delta) {
                Ok(audio) => {
                    ctx.stats.audio_chunks_received.fetch_add(1, Ordering::Relaxed);
                    if ctx.audio_tx.send(AudioEvent::Chunk(Bytes::from(audio))).is_err() {
                        // Pump is gone: the call is tearing down.
                        break;
                    }
                }
                Err(e) => log::warn!("undecodable audio delta ({} chars): {}", delta.len(), e),
            },
            ServerEvent::ResponseDone => {
                // In-band so it cannot overtake queued audio.
                if ctx.audio_tx.send(AudioEvent::ResponseDone).is_err() {
                    break;
                }
            }
            ServerEvent::SpeechStarted => ctx.handler.on_barge_in(),
            ServerEvent::TranscriptionCompleted { transcript } => {
                ctx.handler.on_transcription(&transcript)
            }
            ServerEvent::Error { error } => ctx.handler.on_error(&error.to_string()),
        }
    }
    log::debug!("AI reader task ended");
}
