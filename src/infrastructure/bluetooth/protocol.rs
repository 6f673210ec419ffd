//! Kilter Board Protocol
//!
//! This module contains the protocol definitions for lighting holds on
//! the board: frame encoding, checksums, color packing and chunking.

use crate::domain::models::LedCommand;
use thiserror::Error;
use uuid::Uuid;

/// Board BLE Service UUID (Nordic UART Service)
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// Write Characteristic UUID - where frames are written (NUS RX)
pub const WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// 84 holds max per frame
pub const MAX_LEDS_PER_FRAME: usize = 84;

/// Largest write the board accepts in one go
pub const DEFAULT_CHUNK_SIZE: usize = 20;

/// Delay between frames in milliseconds
pub const DEFAULT_FRAME_DELAY_MS: u64 = 400;

const FRAME_START: u8 = 0x01;
const PAYLOAD_START: u8 = 0x02;
const FRAME_END: u8 = 0x03;

/// Bytes wrapped around the payload
pub const ENVELOPE_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("too many leds in one frame: {0} (max 84)")]
    TooManyLeds(usize),
    #[error("invalid color {0:?}, expected 6 hex digits (RRGGBB)")]
    InvalidColor(String),
    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(usize),
    #[error("message needs {0} frames, at most 255 fit in one message")]
    MessageTooLong(usize),
}

/// Position of a frame inside a multi-frame message.
///
/// Sent as the first payload byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameRole {
    Middle = 81,
    First = 82,
    Last = 83,
    Only = 84,
}

impl FrameRole {
    pub fn for_position(packet_id: u8, num_packets: u8) -> Self {
        if packet_id == 0 && num_packets == 1 {
            Self::Only
        } else if packet_id == 0 {
            Self::First
        } else if packet_id == num_packets.wrapping_sub(1) {
            Self::Last
        } else {
            Self::Middle
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// An RGB888 color parsed from `RRGGBB`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub fn parse_hex(hex: &str) -> Result<Self, CodecError> {
        // from_str_radix would accept a leading '+', so check digits first
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CodecError::InvalidColor(hex.to_string()));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|_| CodecError::InvalidColor(hex.to_string()))
        };
        Ok(Self {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        })
    }

    pub fn to_rgb332(self) -> u8 {
        rgb888_to_rgb332(self.r, self.g, self.b)
    }
}

/// r,g,b in 0..255 -> one byte RGB332
pub fn rgb888_to_rgb332(r: u8, g: u8, b: u8) -> u8 {
    let r3 = r >> 5; // keep top 3 bits
    let g3 = g >> 5; // keep top 3 bits
    let b2 = b >> 6; // keep top 2 bits
    (r3 << 5) | (g3 << 2) | b2
}

/// Complement of the byte sum, mod 256
pub fn checksum(payload: &[u8]) -> u8 {
    !payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// One complete, checksummed protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    packet_id: u8,
    num_packets: u8,
    leds: Vec<LedCommand>,
    bytes: Vec<u8>,
}

impl Frame {
    /// Encode a frame
    ///
    /// # Frame Layout
    ///
    /// ```text
    /// [0]     : 0x01
    /// [1]     : payload length (1 + 3 * leds)
    /// [2]     : checksum over the payload
    /// [3]     : 0x02
    /// [4]     : role byte (see FrameRole)
    /// [5..]   : per led: id low byte, id high byte, RGB332 color
    /// [last]  : 0x03
    /// ```
    pub fn encode(leds: &[LedCommand], packet_id: u8, num_packets: u8) -> Result<Self, CodecError> {
        if leds.len() > MAX_LEDS_PER_FRAME {
            return Err(CodecError::TooManyLeds(leds.len()));
        }

        let mut payload = Vec::with_capacity(1 + leds.len() * 3);
        payload.push(FrameRole::for_position(packet_id, num_packets).as_byte());
        for led in leds {
            let [low, high] = led.led_id.to_le_bytes();
            payload.push(low);
            payload.push(high);
            payload.push(Rgb::parse_hex(&led.color_hex)?.to_rgb332());
        }

        let mut bytes = Vec::with_capacity(payload.len() + ENVELOPE_LEN);
        bytes.push(FRAME_START);
        // At most 1 + 3 * 84 = 253, always fits
        bytes.push(payload.len() as u8);
        bytes.push(checksum(&payload));
        bytes.push(PAYLOAD_START);
        bytes.extend_from_slice(&payload);
        bytes.push(FRAME_END);

        Ok(Self {
            packet_id,
            num_packets,
            leds: leds.to_vec(),
            bytes,
        })
    }

    pub fn packet_id(&self) -> u8 {
        self.packet_id
    }

    pub fn num_packets(&self) -> u8 {
        self.num_packets
    }

    pub fn leds(&self) -> &[LedCommand] {
        &self.leds
    }

    pub fn role(&self) -> FrameRole {
        FrameRole::for_position(self.packet_id, self.num_packets)
    }

    /// Wire bytes, envelope included
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Role byte and led triples, without the envelope
    pub fn payload(&self) -> &[u8] {
        &self.bytes[4..self.bytes.len() - 1]
    }

    /// Split into writes of at most `chunk_size` bytes
    pub fn chunks(&self, chunk_size: usize) -> Result<Vec<Vec<u8>>, CodecError> {
        chunk_bytes(&self.bytes, chunk_size)
    }
}

/// Split `data` into consecutive chunks of at most `chunk_size` bytes
pub fn chunk_bytes(data: &[u8], chunk_size: usize) -> Result<Vec<Vec<u8>>, CodecError> {
    if chunk_size == 0 {
        return Err(CodecError::InvalidChunkSize(chunk_size));
    }
    Ok(data.chunks(chunk_size).map(<[u8]>::to_vec).collect())
}

/// Encode an arbitrary number of leds as a sequence of frames.
///
/// An empty list still produces a single (empty) frame.
pub fn encode_message(leds: &[LedCommand]) -> Result<Vec<Frame>, CodecError> {
    if leds.is_empty() {
        return Ok(vec![Frame::encode(&[], 0, 1)?]);
    }

    let groups: Vec<&[LedCommand]> = leds.chunks(MAX_LEDS_PER_FRAME).collect();
    let num_packets =
        u8::try_from(groups.len()).map_err(|_| CodecError::MessageTooLong(groups.len()))?;

    groups
        .into_iter()
        .enumerate()
        .map(|(i, group)| Frame::encode(group, i as u8, num_packets))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leds(n: usize, color: &str) -> Vec<LedCommand> {
        (0..n).map(|i| LedCommand::new(i as u16 * 7, color)).collect()
    }

    #[test]
    fn test_uuids() {
        assert_eq!(
            SERVICE_UUID.to_string().to_uppercase(),
            "6E400001-B5A3-F393-E0A9-E50E24DCCA9E"
        );
        assert_eq!(
            WRITE_CHAR_UUID.to_string().to_uppercase(),
            "6E400002-B5A3-F393-E0A9-E50E24DCCA9E"
        );
    }

    #[test]
    fn test_rgb332() {
        assert_eq!(rgb888_to_rgb332(255, 255, 255), 0xFF);
        assert_eq!(rgb888_to_rgb332(0, 0, 0), 0x00);
        assert_eq!(rgb888_to_rgb332(255, 0, 0), 0b1110_0000);
        assert_eq!(rgb888_to_rgb332(0, 255, 0), 0b0001_1100);
        assert_eq!(rgb888_to_rgb332(0, 0, 255), 0b0000_0011);
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(
            Rgb::parse_hex("FFa07A").unwrap(),
            Rgb {
                r: 0xFF,
                g: 0xA0,
                b: 0x7A
            }
        );
        for bad in ["", "FFF", "#FF0000", "FF00000", "GG0000", "+F0000"] {
            assert_eq!(
                Rgb::parse_hex(bad),
                Err(CodecError::InvalidColor(bad.to_string())),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_single_red_led_bytes() {
        let frame = Frame::encode(&[LedCommand::new(0x0102, "FF0000")], 0, 1).unwrap();
        let payload = [84u8, 0x02, 0x01, 0xE0];
        let sum = payload.iter().fold(0u8, |a, b| a.wrapping_add(*b));
        assert_eq!(
            frame.as_bytes(),
            &[0x01, 4, !sum, 0x02, 84, 0x02, 0x01, 0xE0, 0x03]
        );
        assert_eq!(frame.payload(), &payload);
    }

    #[test]
    fn test_frame_envelope() {
        for n in [1, 2, 20, MAX_LEDS_PER_FRAME] {
            let frame = Frame::encode(&leds(n, "12AB34"), 0, 1).unwrap();
            let bytes = frame.as_bytes();
            assert_eq!(bytes.len(), 6 + 3 * n);
            assert_eq!(bytes[0], 0x01);
            assert_eq!(bytes[1] as usize, 1 + 3 * n);
            assert_eq!(bytes[3], 0x02);
            assert_eq!(*bytes.last().unwrap(), 0x03);
        }
    }

    #[test]
    fn test_checksum_complement() {
        for n in [1, 13, MAX_LEDS_PER_FRAME] {
            let frame = Frame::encode(&leds(n, "FFFFFF"), 0, 1).unwrap();
            let check = frame.as_bytes()[2];
            let total = frame
                .payload()
                .iter()
                .chain(std::iter::once(&check))
                .fold(0u8, |a, b| a.wrapping_add(*b));
            assert_eq!(total, 0xFF);
        }
        assert_eq!(checksum(&[]), 0xFF);
        assert_eq!(checksum(&[0xFF, 0x01]), 0xFF);
    }

    #[test]
    fn test_too_many_leds() {
        assert_eq!(
            Frame::encode(&leds(85, "FF0000"), 0, 1),
            Err(CodecError::TooManyLeds(85))
        );
    }

    #[test]
    fn test_invalid_color_in_frame() {
        let result = Frame::encode(&[LedCommand::new(1, "red")], 0, 1);
        assert_eq!(result, Err(CodecError::InvalidColor("red".to_string())));
    }

    #[test]
    fn test_role_bytes() {
        let one = leds(1, "00FF00");
        assert_eq!(Frame::encode(&one, 0, 1).unwrap().payload()[0], 84);
        assert_eq!(Frame::encode(&one, 0, 3).unwrap().payload()[0], 82);
        assert_eq!(Frame::encode(&one, 2, 3).unwrap().payload()[0], 83);
        assert_eq!(Frame::encode(&one, 1, 3).unwrap().payload()[0], 81);
    }

    #[test]
    fn test_chunking_reassembles() {
        let frame = Frame::encode(&leds(30, "0000FF"), 0, 1).unwrap();
        let len = frame.as_bytes().len();
        for size in [1, 3, DEFAULT_CHUNK_SIZE, len, len + 5] {
            let chunks = frame.chunks(size).unwrap();
            assert_eq!(chunks.len(), len.div_ceil(size));
            assert!(chunks.iter().all(|c| c.len() <= size));
            assert_eq!(chunks.concat(), frame.as_bytes());
        }
    }

    #[test]
    fn test_zero_chunk_size() {
        let frame = Frame::encode(&leds(1, "0000FF"), 0, 1).unwrap();
        assert_eq!(frame.chunks(0), Err(CodecError::InvalidChunkSize(0)));
    }

    #[test]
    fn test_encode_message_numbering() {
        let frames = encode_message(&leds(200, "FF00FF")).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(
            frames.iter().map(|f| f.leds().len()).collect::<Vec<_>>(),
            vec![84, 84, 32]
        );
        assert_eq!(
            frames.iter().map(Frame::role).collect::<Vec<_>>(),
            vec![FrameRole::First, FrameRole::Middle, FrameRole::Last]
        );
        assert!(frames.iter().all(|f| f.num_packets() == 3));

        let single = encode_message(&leds(84, "FF00FF")).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].role(), FrameRole::Only);
    }

    #[test]
    fn test_encode_empty_message() {
        let frames = encode_message(&[]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), &[0x01, 1, !84u8, 0x02, 84, 0x03]);
    }
}
