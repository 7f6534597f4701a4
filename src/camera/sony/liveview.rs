use crate::frame::LiveFrame;
use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

const COMMON_HEADER_LEN: usize = 8;
const PAYLOAD_HEADER_LEN: usize = 128;
const HEADER_LEN: usize = COMMON_HEADER_LEN + PAYLOAD_HEADER_LEN;

const START_BYTE: u8 = 0xFF;
const PAYLOAD_START_CODE: [u8; 4] = [0x24, 0x35, 0x68, 0x79];

const PAYLOAD_TYPE_IMAGE: u8 = 0x01;
const PAYLOAD_TYPE_FRAME_INFO: u8 = 0x02;

/// Incremental decoder for the camera's live view packet stream.
///
/// Each packet is an 8 byte common header (start byte, payload type, sequence
/// number, timestamp), a 128 byte payload header (start code, data size,
/// padding size) and the payload followed by padding. Chunks can be pushed at
/// arbitrary boundaries; only complete image payloads are returned.
#[derive(Debug, Default)]
pub struct LiveViewDecoder {
    buffer: BytesMut,
    frames_decoded: u64,
    bytes_skipped: u64,
}

struct PacketHeader {
    payload_type: u8,
    sequence: u16,
    timestamp: u32,
    data_size: usize,
    padding_size: usize,
}

impl LiveViewDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk read from the stream
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Extract the next complete image frame, `None` when more bytes are needed
    pub fn next_frame(&mut self) -> Option<LiveFrame> {
        loop {
            if !self.resync() {
                return None;
            }
            if self.buffer.len() < HEADER_LEN {
                return None;
            }

            let header = match parse_header(&self.buffer[..HEADER_LEN]) {
                Some(header) => header,
                None => {
                    // start byte without a valid payload header, not a packet boundary
                    self.skip(1);
                    continue;
                }
            };

            let packet_len = HEADER_LEN + header.data_size + header.padding_size;
            if self.buffer.len() < packet_len {
                return None;
            }

            self.buffer.advance(HEADER_LEN);
            let data = self.buffer.split_to(header.data_size).freeze();
            self.buffer.advance(header.padding_size);

            match header.payload_type {
                PAYLOAD_TYPE_IMAGE => {
                    self.frames_decoded += 1;
                    trace!(
                        "Decoded live view frame {} ({} bytes)",
                        header.sequence,
                        data.len()
                    );
                    return Some(LiveFrame::new(
                        u64::from(header.sequence),
                        header.timestamp,
                        data,
                    ));
                }
                PAYLOAD_TYPE_FRAME_INFO => {
                    trace!("Skipping frame information packet {}", header.sequence);
                }
                other => {
                    debug!("Skipping live view packet with unknown type {:#04x}", other);
                }
            }
        }
    }

    /// Bytes held back waiting for the rest of a packet
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Drop whatever partial packet is left when the stream ends
    pub fn finish(&mut self) {
        if !self.buffer.is_empty() {
            debug!(
                "Live view stream ended with {} bytes of an incomplete packet",
                self.buffer.len()
            );
            self.buffer.clear();
        }
    }

    /// Discard bytes until the buffer starts at a start byte; false when empty
    fn resync(&mut self) -> bool {
        match self.buffer.iter().position(|&b| b == START_BYTE) {
            Some(0) => true,
            Some(offset) => {
                debug!("Live view stream out of sync, skipping {} bytes", offset);
                self.skip(offset);
                true
            }
            None => {
                let len = self.buffer.len();
                if len > 0 {
                    debug!("Live view stream out of sync, skipping {} bytes", len);
                }
                self.skip(len);
                false
            }
        }
    }

    fn skip(&mut self, count: usize) {
        self.buffer.advance(count);
        self.bytes_skipped += count as u64;
    }

    pub fn bytes_skipped(&self) -> u64 {
        self.bytes_skipped
    }
}

fn parse_header(header: &[u8]) -> Option<PacketHeader> {
    if header[0] != START_BYTE {
        return None;
    }

    let payload = &header[COMMON_HEADER_LEN..];
    if payload[..4] != PAYLOAD_START_CODE {
        return None;
    }

    Some(PacketHeader {
        payload_type: header[1],
        sequence: u16::from_be_bytes([header[2], header[3]]),
        timestamp: u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
        data_size: u32::from_be_bytes([0, payload[4], payload[5], payload[6]]) as usize,
        padding_size: payload[7] as usize,
    })
}

#[cfg(test)]
pub(crate) fn encode_packet(payload_type: u8, sequence: u16, data: &[u8], padding: u8) -> Vec<u8> {
    let mut packet = vec![START_BYTE, payload_type];
    packet.extend_from_slice(&sequence.to_be_bytes());
    packet.extend_from_slice(&(u32::from(sequence) * 33).to_be_bytes());

    packet.extend_from_slice(&PAYLOAD_START_CODE);
    let size = (data.len() as u32).to_be_bytes();
    packet.extend_from_slice(&size[1..]);
    packet.push(padding);
    packet.resize(HEADER_LEN, 0);

    packet.extend_from_slice(data);
    packet.resize(packet.len() + padding as usize, 0);
    packet
}
