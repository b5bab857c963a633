//! RTP packets for the G.711 telephony leg.
//!
//! The bridge's wire envelope is the minimal RFC 3550 shape a phone call
//! uses: a bare 12-byte header, payload type 0 or 8, one 160-byte frame per
//! packet, timestamp stepping by 160. Nothing on the send path ever emits
//! CSRC lists, header extensions, or padding, and a peer that sends them is
//! not delivering caller media, so the parser treats them as non-media
//! rather than carrying machinery to walk them.

use rand::Rng;

use crate::{Frame, FRAME_SIZE, TIMESTAMP_STEP};

/// The fixed header length of the bridge's envelope.
pub const HEADER_LEN: usize = 12;

/// A received media packet: the header fields the bridge consumes plus the
/// payload.
#[derive(Debug)]
pub struct RtpPacket<'a> {
    /// Payload type (0 = PCMU, 8 = PCMA on this leg)
    pub payload_type: u8,
    /// Sequence number (wraps at 65535)
    pub sequence: u16,
    /// Timestamp in samples
    pub timestamp: u32,
    /// Synchronization source identifier
    pub ssrc: u32,
    /// G.711 payload bytes
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Parse a datagram as caller media.
    ///
    /// Accepts version 2 with the plain envelope; trailing padding is
    /// trimmed when flagged. Datagrams carrying CSRC contributors or header
    /// extensions come from mixers and test tooling, not a caller's phone,
    /// and yield `None` like any other non-media traffic.
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }

        let byte0 = data[0];
        if byte0 >> 6 != 2 {
            return None;
        }
        // X flag or a non-zero CSRC count: not the telephony envelope.
        if byte0 & 0x1F != 0 {
            return None;
        }

        let payload_end = if byte0 & 0x20 != 0 {
            let padding = *data.last()? as usize;
            data.len()
                .checked_sub(padding)
                .filter(|&end| end >= HEADER_LEN)?
        } else {
            data.len()
        };

        Some(RtpPacket {
            payload_type: data[1] & 0x7F,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            payload: &data[HEADER_LEN..payload_end],
        })
    }
}

/// Builds the call's outbound packets.
///
/// SSRC is random and stable for the call; sequence and timestamp start at
/// random offsets and wrap. Every packet is one frame, so the timestamp
/// always steps by 160 and the packet length is always 172 bytes.
pub struct RtpPacketBuilder {
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
    payload_type: u8,
    buffer: [u8; HEADER_LEN + FRAME_SIZE],
}

impl RtpPacketBuilder {
    /// Create a builder with a random identity.
    pub fn new(payload_type: u8) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            ssrc: rng.gen(),
            sequence: rng.gen(),
            timestamp: rng.gen(),
            payload_type,
            buffer: [0u8; HEADER_LEN + FRAME_SIZE],
        }
    }

    /// Create a builder with a fixed SSRC (deterministic streams in tests
    /// and diagnostics).
    pub fn with_ssrc(ssrc: u32, payload_type: u8) -> Self {
        Self {
            ssrc,
            sequence: 0,
            timestamp: 0,
            payload_type,
            buffer: [0u8; HEADER_LEN + FRAME_SIZE],
        }
    }

    /// Build the packet for one 20 ms frame and advance sequence and
    /// timestamp. Returns the complete 172-byte packet.
    pub fn build_packet(&mut self, frame: &Frame) -> &[u8] {
        self.buffer[0] = 0x80; // version 2, no padding/extension/CSRC
        self.buffer[1] = self.payload_type & 0x7F; // marker clear
        self.buffer[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        self.buffer[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        self.buffer[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        self.buffer[HEADER_LEN..].copy_from_slice(frame);

        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(TIMESTAMP_STEP);

        &self.buffer
    }

    /// Next sequence number to be sent.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Next timestamp to be sent.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// This call's SSRC.
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_telephony_envelope() {
        // V=2, no flags, PT=8, seq=1234, ts=5678, ssrc=0xDEADBEEF
        let mut data = vec![
            0x80, 8, 0x04, 0xD2, 0x00, 0x00, 0x16, 0x2E, 0xDE, 0xAD, 0xBE, 0xEF,
        ];
        data.extend_from_slice(&[0xD5; 160]);

        let packet = RtpPacket::parse(&data).unwrap();
        assert_eq!(packet.payload_type, 8);
        assert_eq!(packet.sequence, 1234);
        assert_eq!(packet.timestamp, 5678);
        assert_eq!(packet.ssrc, 0xDEADBEEF);
        assert_eq!(packet.payload.len(), 160);
    }

    #[test]
    fn rejects_runts_and_wrong_version() {
        assert!(RtpPacket::parse(&[0x80; 11]).is_none());
        let v1 = [0x40u8, 8, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1];
        assert!(RtpPacket::parse(&v1).is_none());
    }

    #[test]
    fn rejects_csrc_and_extension_envelopes() {
        // CC=1: a mixer's contributor list.
        let csrc = [0x81u8, 8, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 2];
        assert!(RtpPacket::parse(&csrc).is_none());
        // X=1: header extension.
        let ext = [0x90u8, 8, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0];
        assert!(RtpPacket::parse(&ext).is_none());
    }

    #[test]
    fn trims_flagged_padding() {
        let mut data = vec![
            0xA0, 0, 0x00, 0x07, 0, 0, 0, 0, 0xFE, 0xED, 0xFA, 0xCE,
        ];
        data.extend_from_slice(&[0xFF; 160]);
        data.extend_from_slice(&[0, 0, 0, 4]); // 4 bytes of padding

        let packet = RtpPacket::parse(&data).unwrap();
        assert_eq!(packet.payload_type, 0);
        assert_eq!(packet.payload.len(), 160);
        assert!(packet.payload.iter().all(|&b| b == 0xFF));

        // Padding longer than the datagram is garbage, not media.
        let mut bogus = data.clone();
        let len = bogus.len();
        bogus[len - 1] = 200;
        assert!(RtpPacket::parse(&bogus).is_none());
    }

    #[test]
    fn builder_emits_fixed_size_packets_and_advances() {
        let mut builder = RtpPacketBuilder::with_ssrc(0x1234, 8);
        let frame = [0xD5u8; 160];

        let first = builder.build_packet(&frame).to_vec();
        assert_eq!(first.len(), HEADER_LEN + FRAME_SIZE);
        let first = RtpPacket::parse(&first).unwrap();
        assert_eq!(first.payload_type, 8);
        assert_eq!(first.payload, &frame[..]);

        let second = builder.build_packet(&frame).to_vec();
        let second = RtpPacket::parse(&second).unwrap();
        assert_eq!(second.timestamp.wrapping_sub(first.timestamp), 160);
        assert_eq!(second.sequence.wrapping_sub(first.sequence), 1);
        assert_eq!(first.ssrc, second.ssrc);
    }

    #[test]
    fn builder_roundtrips_through_parse() {
        let mut builder = RtpPacketBuilder::new(0);
        let frame = [0x7Fu8; 160];
        let packet = builder.build_packet(&frame).to_vec();
        let parsed = RtpPacket::parse(&packet).unwrap();
        assert_eq!(parsed.payload_type, 0);
        assert_eq!(parsed.ssrc, builder.ssrc());
        assert_eq!(parsed.payload, &frame[..]);
    }

    #[test]
    fn builder_random_identity_differs() {
        let a = RtpPacketBuilder::new(8);
        let b = RtpPacketBuilder::new(8);
        // Random SSRCs collide with probability 2^-32; treat equality as a bug.
        assert_ne!(a.ssrc(), b.ssrc());
    }
}
