//! Per-call lifecycle orchestration.
//!
//! A `CallSession` is created once the SIP layer has negotiated a codec and
//! owns everything below it: the egress pipe (which owns the playout
//! engine), the ingress path, the barge-in gate, the watchdog, and the AI
//! connection. Ownership is a strict tree; callbacks hold channel handles
//! or shared atomics, never back-pointers, and teardown runs leaf-first.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::ai::client::AudioEvent;
use crate::ai::{AiClient, AiClientConfig, AiEventHandler};
use crate::bargein::{BargeInGate, PlayoutWatchdog};
use crate::codec::Codec;
use crate::config::BridgeConfig;
use crate::egress::{EgressPipe, InputMode};
use crate::error::BridgeError;
use crate::ingress::IngressPath;
use crate::rtp::{RtpPacket, RtpSender, RtpSocket};

/// Dispatches AI events into the bridge state machine.
///
/// Holds only shared handles; the watchdog slot is filled after the AI
/// client exists because its notification closure needs the client.
struct SessionHandler {
    gate: Arc<BargeInGate>,
    pipe: Arc<EgressPipe>,
    watchdog: Mutex<Option<Arc<PlayoutWatchdog>>>,
}

impl SessionHandler {
    fn set_watchdog(&self, watchdog: Arc<PlayoutWatchdog>) {
        *self.watchdog.lock() = Some(watchdog);
    }
}

impl AiEventHandler for SessionHandler {
    fn on_barge_in(&self) {
        log::info!("barge-in: clearing playout");
        self.gate.force_idle();
        if let Some(wd) = self.watchdog.lock().as_ref() {
            wd.cancel();
        }
        self.pipe.clear();
    }
}

/// One bridged call.
pub struct CallSession {
    codec: Codec,
    gate: Arc<BargeInGate>,
    watchdog: Arc<PlayoutWatchdog>,
    pipe: Arc<EgressPipe>,
    ingress: Arc<IngressPath>,
    ai: Arc<AiClient>,
    pump: Option<JoinHandle<()>>,
    pump_running: Arc<AtomicBool>,
    receiver: Option<JoinHandle<()>>,
    receiver_running: Arc<AtomicBool>,
    started: AtomicBool,
}

impl CallSession {
    /// Wire up a call: connect the AI, build the pipeline, leave everything
    /// stopped until `start`.
    pub fn new(
        config: &BridgeConfig,
        codec: Codec,
        ai_config: AiClientConfig,
    ) -> Result<Self, BridgeError> {
        log::info!(
            "session {}: codec {}, echo guard {} ms (gate tail fixed at 300 ms)",
            ai_config.call_id,
            codec.name(),
            config.echo_guard_ms
        );

        let gate = Arc::new(BargeInGate::new());
        let pipe = Arc::new(EgressPipe::new(config, codec, InputMode::Alaw));

        // Egress queueing a frame is the BotSpeaking edge.
        let gate_hook = gate.clone();
        pipe.set_frame_queued_hook(Box::new(move || gate_hook.note_bot_audio()));

        let handler = Arc::new(SessionHandler {
            gate: gate.clone(),
            pipe: pipe.clone(),
            watchdog: Mutex::new(None),
        });

        let ai = Arc::new(AiClient::connect(ai_config, codec, handler.clone())?);

        let ai_notify = ai.clone();
        let watchdog = Arc::new(PlayoutWatchdog::new(Box::new(move || {
            ai_notify.notify_playout_complete()
        })));
        handler.set_watchdog(watchdog.clone());

        let ingress = Arc::new(IngressPath::new(config, codec, gate.clone()));

        Ok(Self {
            codec,
            gate,
            watchdog,
            pipe,
            ingress,
            ai,
            pump: None,
            pump_running: Arc::new(AtomicBool::new(false)),
            receiver: None,
            receiver_running: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
        })
    }

    /// Start audio: spawn playout against the negotiated RTP peer and the
    /// pump that drains the AI's audio stream into the pipe. Idempotent.
    pub fn start(&mut self, socket: &RtpSocket, remote_addr: SocketAddr) -> Result<(), BridgeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let sender = RtpSender::new(
            socket.try_clone()?,
            remote_addr,
            self.codec.payload_type(),
        );

        let gate = self.gate.clone();
        let watchdog = self.watchdog.clone();
        self.pipe.start(
            Box::new(sender),
            Box::new(move || {
                gate.note_queue_empty();
                watchdog.on_queue_empty();
            }),
        )?;

        // The audio stream is taken exactly once; a second start of a fresh
        // session on the same client is impossible by construction.
        if let Some(audio_rx) = self.ai.take_audio_stream() {
            let pipe = self.pipe.clone();
            let gate = self.gate.clone();
            let watchdog = self.watchdog.clone();
            let running = self.pump_running.clone();
            running.store(true, Ordering::SeqCst);
            let handle = thread::Builder::new()
                .name("egress-pump".to_string())
                .spawn(move || {
                    while running.load(Ordering::SeqCst) {
                        match audio_rx.recv_timeout(Duration::from_millis(100)) {
                            Ok(AudioEvent::Chunk(chunk)) => pipe.push(&chunk),
                            Ok(AudioEvent::ResponseDone) => {
                                // Release the response tail before judging
                                // queue state, so the caller hears the last
                                // partial frame and the playout-complete
                                // signal waits for it.
                                pipe.flush();
                                gate.note_response_done();
                                watchdog.on_response_done(pipe.queue_is_empty());
                            }
                            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                        }
                    }
                })
                .map_err(|e| BridgeError::ThreadSpawn {
                    name: "egress-pump",
                    source: e,
                })?;
            self.pump = Some(handle);
        }
        Ok(())
    }

    /// Feed one received RTP payload through ingress to the AI.
    ///
    /// Called by SIP transports that deliver depacketized media themselves;
    /// transports that expose a bare socket use [`start_receiver`] instead.
    ///
    /// [`start_receiver`]: CallSession::start_receiver
    pub fn handle_rtp_payload(&self, payload: &[u8]) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        if let Some(audio) = self.ingress.process(payload) {
            self.ai.send_audio(&audio);
        }
    }

    /// Spawn the receive loop for the call's RTP socket. No-op if already
    /// receiving.
    ///
    /// Datagrams from other sources, non-media payload types (stray RTCP),
    /// and runts are discarded without comment.
    pub fn start_receiver(
        &mut self,
        socket: RtpSocket,
        remote_addr: SocketAddr,
    ) -> Result<(), BridgeError> {
        if self.receiver_running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let ingress = self.ingress.clone();
        let ai = self.ai.clone();
        let running = self.receiver_running.clone();
        let expected_pt = self.codec.payload_type();

        let handle = thread::Builder::new()
            .name("rtp-recv".to_string())
            .spawn(move || {
                let mut buf = [0u8; 2048];
                while running.load(Ordering::SeqCst) {
                    match socket.recv_from_remote(&mut buf, remote_addr) {
                        Ok(len) if len >= 12 => {
                            if let Some(packet) = RtpPacket::parse(&buf[..len]) {
                                if packet.payload_type != expected_pt {
                                    continue;
                                }
                                if let Some(audio) = ingress.process(packet.payload) {
                                    ai.send_audio(&audio);
                                }
                            }
                        }
                        Ok(_) => continue, // runt datagram
                        Err(ref e)
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut =>
                        {
                            continue
                        }
                        Err(e) => {
                            log::warn!("RTP receive failed, stopping receiver: {}", e);
                            break;
                        }
                    }
                }
            })
            .map_err(|e| {
                self.receiver_running.store(false, Ordering::SeqCst);
                BridgeError::ThreadSpawn {
                    name: "rtp-recv",
                    source: e,
                }
            })?;
        self.receiver = Some(handle);
        Ok(())
    }

    /// Tear the call down leaf-first: playout, pipe, receiver, pump, AI
    /// connection. Idempotent; safe against late AI callbacks.
    pub fn stop(&mut self) {
        self.started.store(false, Ordering::SeqCst);
        self.pipe.stop();
        self.receiver_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.receiver.take() {
            // The socket read timeout bounds the join.
            let _ = handle.join();
        }
        self.pump_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.pump.take() {
            let _ = handle.join();
        }
        self.ai.close();
    }

    /// Negotiated codec for this call.
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// The egress pipe (for observers such as the audio-socket fork).
    pub fn pipe(&self) -> &Arc<EgressPipe> {
        &self.pipe
    }

    /// Ingress statistics handle.
    pub fn ingress_stats(&self) -> Arc<crate::ingress::IngressStats> {
        self.ingress.stats()
    }

    /// Whether the AI has confirmed the session and audio may flow.
    pub fn is_ai_ready(&self) -> bool {
        self.ai.is_ready()
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bargein::BargeInState;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Instant;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    /// Scripted AI peer: confirms the session, then relays whatever the test
    /// feeds through the command channel.
    fn spawn_fake_ai() -> (String, mpsc::UnboundedSender<String>, Arc<Mutex<Vec<String>>>) {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<String>();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_srv = received.clone();

        let runtime_handle = crate::ai::client::test_runtime();

        let listener = runtime_handle.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let addr = listener.local_addr().unwrap();

        runtime_handle.spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut sink, mut source) = ws.split();

            sink.send(Message::Text(r#"{"type":"session.created"}"#.to_string()))
                .await
                .unwrap();

            loop {
                tokio::select! {
                    Some(event) = cmd_rx.recv() => {
                        if sink.send(Message::Text(event)).await.is_err() {
                            break;
                        }
                    }
                    msg = source.next() => match msg {
                        Some(Ok(Message::Text(text))) => received_srv.lock().push(text),
                        Some(Ok(Message::Close(_))) | None => break,
                        _ => {}
                    },
                    else => break,
                }
            }
        });

        (format!("ws://{}", addr), cmd_tx, received)
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn session_for(url: String) -> CallSession {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = BridgeConfig::default();
        CallSession::new(
            &config,
            Codec::Alaw,
            AiClientConfig {
                url,
                voice: "sage".to_string(),
                call_id: "test-call".to_string(),
                caller_phone: "+15550002222".to_string(),
                announce_session: false,
            },
        )
        .unwrap()
    }

    #[test]
    fn ai_audio_reaches_rtp_and_playout_complete_fires_once() {
        let (url, cmd, received) = spawn_fake_ai();
        let mut session = session_for(url);

        // Local RTP peer standing in for the caller's phone.
        let caller = RtpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let bridge_sock = RtpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        session.start(&bridge_sock, caller.local_addr()).unwrap();
        session.start(&bridge_sock, caller.local_addr()).unwrap(); // idempotent

        // 10 frames of bot speech, then response end.
        let audio = BASE64.encode([0x2Au8; 1600]);
        cmd.send(format!(
            r#"{{"type":"response.audio.delta","delta":"{}"}}"#,
            audio
        ))
        .unwrap();
        cmd.send(r#"{"type":"response.done"}"#.to_string()).unwrap();

        // The caller's socket sees RTP with the bot audio inside.
        let mut buf = [0u8; 2048];
        let mut speech_packets = 0;
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline && speech_packets < 10 {
            match caller.recv(&mut buf) {
                Ok(len) => {
                    let packet = crate::rtp::RtpPacket::parse(&buf[..len]).unwrap();
                    assert_eq!(packet.payload_type, 8);
                    assert_eq!(packet.payload.len(), 160);
                    if packet.payload.iter().all(|&b| b == 0x2A) {
                        speech_packets += 1;
                    }
                }
                Err(_) => continue,
            }
        }
        assert_eq!(speech_packets, 10);

        // Exactly one playout.complete, strictly after the drain.
        assert!(wait_until(Duration::from_secs(5), || {
            received
                .lock()
                .iter()
                .any(|m| m.contains("playout.complete"))
        }));
        thread::sleep(Duration::from_millis(200));
        let completes = received
            .lock()
            .iter()
            .filter(|m| m.contains("playout.complete"))
            .count();
        assert_eq!(completes, 1);

        session.stop();
        session.stop(); // idempotent
    }

    #[test]
    fn barge_in_event_clears_pipeline_and_gate() {
        let (url, cmd, _received) = spawn_fake_ai();
        let mut session = session_for(url);

        let caller = RtpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let bridge_sock = RtpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        session.start(&bridge_sock, caller.local_addr()).unwrap();

        // Queue plenty of bot audio.
        let audio = BASE64.encode([0x2Au8; 8000]); // 50 frames
        cmd.send(format!(
            r#"{{"type":"response.audio.delta","delta":"{}"}}"#,
            audio
        ))
        .unwrap();

        assert!(wait_until(Duration::from_secs(5), || {
            session.pipe().queue_len() > 10
        }));
        assert_eq!(session.gate_state_for_test(), BargeInState::BotSpeaking);

        cmd.send(r#"{"type":"input_audio_buffer.speech_started"}"#.to_string())
            .unwrap();

        assert!(wait_until(Duration::from_secs(5), || {
            session.pipe().queue_is_empty()
        }));
        assert!(wait_until(Duration::from_secs(1), || {
            session.gate_state_for_test() == BargeInState::Idle
        }));

        session.stop();
    }

    impl CallSession {
        fn gate_state_for_test(&self) -> BargeInState {
            self.gate.state()
        }
    }

    #[test]
    fn rtp_payloads_flow_to_ai_after_flush_guard() {
        let (url, _cmd, received) = spawn_fake_ai();
        let mut session = session_for(url);

        let caller = RtpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let bridge_sock = RtpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        session.start(&bridge_sock, caller.local_addr()).unwrap();

        assert!(wait_until(Duration::from_secs(5), || session.is_ai_ready()));

        // Ride out the 500 ms flush window, then exceed the 20-packet guard.
        thread::sleep(Duration::from_millis(600));
        for _ in 0..25 {
            session.handle_rtp_payload(&[0xD5; 160]);
        }

        assert!(wait_until(Duration::from_secs(5), || {
            received
                .lock()
                .iter()
                .any(|m| m.contains("input_audio_buffer.append"))
        }));
        let appends = received
            .lock()
            .iter()
            .filter(|m| m.contains("input_audio_buffer.append"))
            .count();
        assert_eq!(appends, 5);

        session.stop();
    }

    #[test]
    fn receiver_loop_depacketizes_to_ai() {
        use crate::rtp::RtpPacketBuilder;

        let (url, _cmd, received) = spawn_fake_ai();
        let mut session = session_for(url);

        let caller = RtpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let bridge_sock = RtpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let bridge_addr = bridge_sock.local_addr();
        session.start(&bridge_sock, caller.local_addr()).unwrap();
        session
            .start_receiver(bridge_sock.try_clone().unwrap(), caller.local_addr())
            .unwrap();

        assert!(wait_until(Duration::from_secs(5), || session.is_ai_ready()));
        thread::sleep(Duration::from_millis(600)); // flush window

        // The caller sends real RTP; a stray wrong-payload-type datagram is
        // ignored without disturbing the count.
        let mut builder = RtpPacketBuilder::with_ssrc(0xFEED, 8);
        let mut stray = RtpPacketBuilder::with_ssrc(0xBEEF, 96);
        for i in 0..25 {
            let packet = builder.build_packet(&[0xD5u8; 160]).to_vec();
            caller.send_to(&packet, bridge_addr).unwrap();
            if i == 5 {
                let odd = stray.build_packet(&[0u8; 160]).to_vec();
                caller.send_to(&odd, bridge_addr).unwrap();
            }
            thread::sleep(Duration::from_millis(2));
        }

        // 25 media packets, 20 eaten by the flush guard.
        assert!(wait_until(Duration::from_secs(5), || {
            received
                .lock()
                .iter()
                .filter(|m| m.contains("input_audio_buffer.append"))
                .count()
                == 5
        }));

        session.stop();
    }
}
