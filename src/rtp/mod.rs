//! RTP plumbing for the telephony leg.
//!
//! RFC 3550 header handling, the bound UDP socket the SIP layer negotiates,
//! and the per-call frame sender the playout engine drives. RTCP from the
//! peer is ignored.

pub mod packet;
pub mod socket;

pub use packet::{RtpPacket, RtpPacketBuilder};
pub use socket::RtpSocket;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::Frame;

/// Wire-send statistics (lock-free atomic updates).
#[derive(Default)]
pub struct RtpSendStats {
    pub packets_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub send_errors: AtomicU64,
}

/// Owns the RTP send path for one call.
///
/// Exactly one playout engine drives this per call, so sends are single
/// writer by construction. Send failures are logged and the timestamp still
/// advances, preserving cadence for the receiver.
pub struct RtpSender {
    socket: RtpSocket,
    remote_addr: SocketAddr,
    builder: RtpPacketBuilder,
    stats: Arc<RtpSendStats>,
}

impl RtpSender {
    /// Create a sender for the negotiated payload type and peer address.
    pub fn new(socket: RtpSocket, remote_addr: SocketAddr, payload_type: u8) -> Self {
        Self {
            socket,
            remote_addr,
            builder: RtpPacketBuilder::new(payload_type),
            stats: Arc::new(RtpSendStats::default()),
        }
    }

    /// Send one 20 ms frame. The RTP timestamp advances by 160 whether or
    /// not the socket accepts the datagram.
    pub fn send_frame(&mut self, frame: &Frame) {
        let packet = self.builder.build_packet(frame);
        match self.socket.send_to(packet, self.remote_addr) {
            Ok(len) => {
                self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                log::debug!("RTP send to {} failed: {}", self.remote_addr, e);
            }
        }
    }

    /// Statistics handle.
    pub fn stats(&self) -> Arc<RtpSendStats> {
        self.stats.clone()
    }
}
