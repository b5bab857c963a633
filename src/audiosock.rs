//! TCP audio-socket bridge.
//!
//! Some deployments park the AI behind an external process speaking a bare
//! stream of concatenated 160-byte A-law frames over TCP: one connection
//! per call, EOF or reset ends the call. The write side forks egress frames
//! (wired as a frame observer on the pipe); the read side hands incoming
//! chunks to a callback on its own thread.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::BridgeError;
use crate::Frame;

/// Callback receiving raw A-law chunks from the peer process.
pub type ChunkCallback = Box<dyn Fn(&[u8]) + Send>;

/// Bridge statistics (lock-free atomic updates).
#[derive(Default)]
pub struct AudioSocketStats {
    pub frames_written: AtomicU64,
    pub bytes_read: AtomicU64,
    pub write_errors: AtomicU64,
}

/// One call's TCP frame bridge.
pub struct AudioSocket {
    writer: Mutex<TcpStream>,
    running: Arc<AtomicBool>,
    /// Set when the peer hung up (EOF or reset).
    ended: Arc<AtomicBool>,
    reader_thread: Option<JoinHandle<()>>,
    stats: Arc<AudioSocketStats>,
}

impl AudioSocket {
    /// Connect to the configured peer port.
    pub fn connect(addr: SocketAddr) -> Result<Self, BridgeError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            writer: Mutex::new(stream),
            running: Arc::new(AtomicBool::new(false)),
            ended: Arc::new(AtomicBool::new(false)),
            reader_thread: None,
            stats: Arc::new(AudioSocketStats::default()),
        })
    }

    /// Spawn the reader thread. No-op if already running.
    pub fn start_reader(&mut self, on_chunk: ChunkCallback) -> Result<(), BridgeError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let stream = self.writer.lock().try_clone()?;
        stream.set_read_timeout(Some(Duration::from_millis(100)))?;

        let running = self.running.clone();
        let ended = self.ended.clone();
        let stats = self.stats.clone();

        let handle = thread::Builder::new()
            .name("audiosock-reader".to_string())
            .spawn(move || reader_loop(stream, running, ended, stats, on_chunk))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                BridgeError::ThreadSpawn {
                    name: "audiosock-reader",
                    source: e,
                }
            })?;
        self.reader_thread = Some(handle);
        Ok(())
    }

    /// Write one 20 ms frame to the peer. Failures mark the stream ended.
    pub fn write_frame(&self, frame: &Frame) {
        let mut stream = self.writer.lock();
        match stream.write_all(frame) {
            Ok(()) => {
                self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                if !self.ended.swap(true, Ordering::SeqCst) {
                    log::warn!("audio socket write failed, call ending: {}", e);
                }
            }
        }
    }

    /// Whether the peer has hung up.
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Shut the connection down and join the reader.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.writer.lock().shutdown(Shutdown::Both);
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
    }

    /// Statistics handle.
    pub fn stats(&self) -> Arc<AudioSocketStats> {
        self.stats.clone()
    }
}

impl Drop for AudioSocket {
    fn drop(&mut self) {
        self.stop();
    }
}

fn reader_loop(
    mut stream: TcpStream,
    running: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
    stats: Arc<AudioSocketStats>,
    on_chunk: ChunkCallback,
) {
    let mut buf = [0u8; 2048];
    while running.load(Ordering::SeqCst) {
        match stream.read(&mut buf) {
            Ok(0) => {
                // EOF: peer ended the call.
                ended.store(true, Ordering::SeqCst);
                break;
            }
            Ok(len) => {
                stats.bytes_read.fetch_add(len as u64, Ordering::Relaxed);
                on_chunk(&buf[..len]);
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => continue,
            Err(ref e) if e.kind() == ErrorKind::TimedOut => continue,
            Err(_) => {
                // Reset: peer ended the call.
                ended.store(true, Ordering::SeqCst);
                break;
            }
        }
    }
}
