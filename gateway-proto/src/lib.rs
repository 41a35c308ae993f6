//! Gateway wire protocol - chunked modem command/response framing over GATT
//!
//! A modem command rarely fits in one GATT write, so clients split it into
//! chunks and wait for an ack notification after each one. Responses travel
//! the other way as a burst of notifications.
//!
//! Inbound (client -> device) layout, written to the TransReceive characteristic:
//!
//! ```text
//! [handle: u32 LE][indicator: u8][len: u8][data: len bytes]
//! ```
//!
//! Outbound (device -> client) layout, notified on the same characteristic:
//!
//! ```text
//! [indicator: u8][len: u8][data: len bytes]
//! ```

pub mod ble;

use std::io;

// Chunk indicators
pub const LAST_CHUNK: u8 = 0x00;
pub const FIRST_CHUNK: u8 = 0x01;
pub const MID_CHUNK: u8 = 0x02;

/// Value notified on the ack characteristic after every non-empty chunk
pub const ACK_TRANSRECEIVE_CHUNK: u8 = 0x01;

/// Size of the handle + indicator + len prefix of an inbound chunk
pub const REQUEST_CHUNK_HEADER_SIZE: usize = 6;

/// Size of the indicator + len prefix of a response chunk
pub const RESPONSE_CHUNK_HEADER_SIZE: usize = 2;

/// Bytes at the end of a notification some clients never receive
pub const GATT_NOTIFICATION_RESERVED_SIZE: usize = 3;

/// Largest payload a single chunk can carry (the length field is one byte)
pub const MAX_CHUNK_PAYLOAD: usize = u8::MAX as usize;

/// Modem handle value meaning "no session open"
pub const INVALID_HANDLE: u32 = 0;

/// Position of a chunk within a logical message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkIndicator {
    First,
    Mid,
    Last,
}

impl ChunkIndicator {
    pub fn as_byte(self) -> u8 {
        match self {
            ChunkIndicator::First => FIRST_CHUNK,
            ChunkIndicator::Mid => MID_CHUNK,
            ChunkIndicator::Last => LAST_CHUNK,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            FIRST_CHUNK => Some(ChunkIndicator::First),
            MID_CHUNK => Some(ChunkIndicator::Mid),
            LAST_CHUNK => Some(ChunkIndicator::Last),
            _ => None,
        }
    }
}

/// Inbound chunk written by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestChunk {
    pub handle: u32,
    pub indicator: ChunkIndicator,
    pub data: Vec<u8>,
}

impl RequestChunk {
    pub fn new(handle: u32, indicator: ChunkIndicator, data: Vec<u8>) -> Self {
        Self {
            handle,
            indicator,
            data,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(REQUEST_CHUNK_HEADER_SIZE + self.data.len());
        buf.extend_from_slice(&self.handle.to_le_bytes());
        buf.push(self.indicator.as_byte());
        buf.push(self.data.len() as u8);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Parse a chunk, rejecting a declared length that disagrees with the write
    pub fn from_bytes(data: &[u8]) -> io::Result<Self> {
        if data.len() < REQUEST_CHUNK_HEADER_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "chunk too short"));
        }

        let handle = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let indicator = ChunkIndicator::from_byte(data[4])
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown chunk indicator"))?;
        let len = data[5] as usize;

        if data.len() != REQUEST_CHUNK_HEADER_SIZE + len {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "chunk length mismatch"));
        }

        Ok(Self {
            handle,
            indicator,
            data: data[REQUEST_CHUNK_HEADER_SIZE..].to_vec(),
        })
    }
}

/// Outbound chunk notified back to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseChunk {
    pub indicator: ChunkIndicator,
    pub data: Vec<u8>,
}

impl ResponseChunk {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RESPONSE_CHUNK_HEADER_SIZE + self.data.len());
        buf.push(self.indicator.as_byte());
        buf.push(self.data.len() as u8);
        buf.extend_from_slice(&self.data);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> io::Result<Self> {
        if data.len() < RESPONSE_CHUNK_HEADER_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "response chunk too short"));
        }

        let indicator = ChunkIndicator::from_byte(data[0])
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown chunk indicator"))?;
        let len = data[1] as usize;

        if data.len() < RESPONSE_CHUNK_HEADER_SIZE + len {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "response chunk truncated"));
        }

        Ok(Self {
            indicator,
            data: data[RESPONSE_CHUNK_HEADER_SIZE..RESPONSE_CHUNK_HEADER_SIZE + len].to_vec(),
        })
    }
}

/// Payload bytes per response chunk for a connection
///
/// `min(mtu, characteristic_capacity)` minus the response header and the
/// reserved notification tail, clamped to what the length byte can express.
/// Returns `None` when nothing would fit.
pub fn response_chunk_capacity(mtu: u16, characteristic_capacity: usize) -> Option<usize> {
    let max = (mtu as usize).min(characteristic_capacity);
    let payload = max.checked_sub(RESPONSE_CHUNK_HEADER_SIZE + GATT_NOTIFICATION_RESERVED_SIZE)?;
    if payload == 0 {
        return None;
    }
    Some(payload.min(MAX_CHUNK_PAYLOAD))
}

/// Split a payload into indicator-tagged pieces of at most `capacity` bytes
///
/// A payload that fits in one piece (including an empty one) yields a single
/// `Last`. Otherwise the first piece is `First`, the final piece is `Last`
/// and everything between is `Mid`.
pub fn segment(payload: &[u8], capacity: usize) -> Vec<(ChunkIndicator, &[u8])> {
    assert!(capacity > 0, "chunk capacity must be non-zero");

    let mut pieces = Vec::with_capacity(payload.len() / capacity + 1);
    let mut remaining = payload;
    let mut first = true;

    loop {
        if remaining.len() > capacity {
            let (head, tail) = remaining.split_at(capacity);
            let indicator = if first { ChunkIndicator::First } else { ChunkIndicator::Mid };
            pieces.push((indicator, head));
            remaining = tail;
            first = false;
        } else {
            pieces.push((ChunkIndicator::Last, remaining));
            return pieces;
        }
    }
}

/// Build the response chunks for a modem response
pub fn response_chunks(response: &[u8], capacity: usize) -> Vec<ResponseChunk> {
    segment(response, capacity)
        .into_iter()
        .map(|(indicator, data)| ResponseChunk {
            indicator,
            data: data.to_vec(),
        })
        .collect()
}

/// Build the request chunks a client writes for one command
pub fn request_chunks(handle: u32, command: &[u8], capacity: usize) -> Vec<RequestChunk> {
    segment(command, capacity.min(MAX_CHUNK_PAYLOAD))
        .into_iter()
        .map(|(indicator, data)| RequestChunk::new(handle, indicator, data.to_vec()))
        .collect()
}

/// What a reassembler did with a chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembly {
    /// Data appended; the sender should be acked
    Appended,
    /// Empty non-final chunk; nothing to ack
    Empty,
    /// A complete message; the buffer has been cleared
    Complete(Vec<u8>),
    /// `Last` arrived with nothing accumulated
    Nothing,
    /// The message outgrew the buffer and was discarded
    Overflow,
}

/// Receive-side buffer for one logical message
///
/// `First` resets the buffer, every chunk appends, `Last` hands the whole
/// message out and clears it.
#[derive(Debug)]
pub struct Reassembler {
    buf: Vec<u8>,
    capacity: usize,
}

impl Reassembler {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Feed one chunk. An ack is owed whenever the result is `Appended`, or
    /// `Complete` for a final chunk that carried data.
    pub fn push(&mut self, indicator: ChunkIndicator, data: &[u8]) -> Reassembly {
        if indicator == ChunkIndicator::First {
            self.buf.clear();
        }

        if self.buf.len() + data.len() > self.capacity {
            self.buf.clear();
            return Reassembly::Overflow;
        }
        self.buf.extend_from_slice(data);

        if indicator == ChunkIndicator::Last {
            if self.buf.is_empty() {
                return Reassembly::Nothing;
            }
            return Reassembly::Complete(std::mem::take(&mut self.buf));
        }

        if data.is_empty() {
            Reassembly::Empty
        } else {
            Reassembly::Appended
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_chunk_layout() {
        let chunk = RequestChunk::new(0x0403_0201, ChunkIndicator::First, vec![1, 2, 3, 4, 5]);
        assert_eq!(
            chunk.to_bytes(),
            vec![0x01, 0x02, 0x03, 0x04, FIRST_CHUNK, 5, 1, 2, 3, 4, 5]
        );
    }

    #[test]
    fn request_chunk_rejects_length_mismatch() {
        let bytes = [1, 0, 0, 0, LAST_CHUNK, 4, 9, 9];
        assert!(RequestChunk::from_bytes(&bytes).is_err());
        assert!(RequestChunk::from_bytes(&[1, 0, 0]).is_err());
        assert!(RequestChunk::from_bytes(&[1, 0, 0, 0, 0x07, 0]).is_err());
    }

    #[test]
    fn request_chunk_allows_empty_last() {
        let chunk = RequestChunk::from_bytes(&[7, 0, 0, 0, LAST_CHUNK, 0]).unwrap();
        assert_eq!(chunk.handle, 7);
        assert_eq!(chunk.indicator, ChunkIndicator::Last);
        assert!(chunk.data.is_empty());
    }

    #[test]
    fn capacity_follows_mtu_and_characteristic() {
        assert_eq!(response_chunk_capacity(23, 512), Some(18));
        assert_eq!(response_chunk_capacity(100, 40), Some(35));
        assert_eq!(response_chunk_capacity(517, 512), Some(MAX_CHUNK_PAYLOAD));
        assert_eq!(response_chunk_capacity(5, 512), None);
    }

    #[test]
    fn single_piece_is_last() {
        let pieces = segment(&[1, 2, 3], 3);
        assert_eq!(pieces, vec![(ChunkIndicator::Last, &[1u8, 2, 3][..])]);

        let empty = segment(&[], 8);
        assert_eq!(empty, vec![(ChunkIndicator::Last, &[][..])]);
    }

    #[test]
    fn segment_tags_first_mid_last() {
        let payload: Vec<u8> = (0..10).collect();
        let tags: Vec<ChunkIndicator> = segment(&payload, 3).into_iter().map(|(i, _)| i).collect();
        assert_eq!(
            tags,
            vec![
                ChunkIndicator::First,
                ChunkIndicator::Mid,
                ChunkIndicator::Mid,
                ChunkIndicator::Last
            ]
        );
    }

    #[test]
    fn segment_then_reassemble_restores_payload() {
        let capacity = 7;
        for n in 0..=10 * capacity {
            let payload: Vec<u8> = (0..n).map(|i| (i * 31 % 251) as u8).collect();
            let pieces = segment(&payload, capacity);

            let expected_pieces = if n == 0 { 1 } else { n.div_ceil(capacity) };
            assert_eq!(pieces.len(), expected_pieces, "n = {n}");
            assert_eq!(pieces.last().map(|p| p.0), Some(ChunkIndicator::Last));
            let firsts = pieces.iter().filter(|p| p.0 == ChunkIndicator::First).count();
            assert_eq!(firsts, usize::from(pieces.len() > 1), "n = {n}");

            let mut reassembler = Reassembler::new(2048);
            let mut out = None;
            for (indicator, data) in pieces {
                if let Reassembly::Complete(message) = reassembler.push(indicator, data) {
                    out = Some(message);
                }
            }
            if n == 0 {
                assert_eq!(out, None);
            } else {
                assert_eq!(out, Some(payload));
            }
            assert!(reassembler.is_empty());
        }
    }

    #[test]
    fn first_discards_partial_message() {
        let mut reassembler = Reassembler::new(64);
        assert_eq!(reassembler.push(ChunkIndicator::First, &[9, 9]), Reassembly::Appended);
        assert_eq!(reassembler.push(ChunkIndicator::First, &[1, 2, 3, 4, 5]), Reassembly::Appended);
        assert_eq!(
            reassembler.push(ChunkIndicator::Last, &[6, 7, 8]),
            Reassembly::Complete(vec![1, 2, 3, 4, 5, 6, 7, 8])
        );
    }

    #[test]
    fn overflow_resets_buffer() {
        let mut reassembler = Reassembler::new(4);
        assert_eq!(reassembler.push(ChunkIndicator::First, &[1, 2, 3]), Reassembly::Appended);
        assert_eq!(reassembler.push(ChunkIndicator::Mid, &[4, 5]), Reassembly::Overflow);
        assert!(reassembler.is_empty());
        assert_eq!(reassembler.push(ChunkIndicator::Last, &[]), Reassembly::Nothing);
    }

    #[test]
    fn response_chunk_parse() {
        let chunk = ResponseChunk {
            indicator: ChunkIndicator::Mid,
            data: vec![0x90, 0x00],
        };
        assert_eq!(chunk.to_bytes(), vec![MID_CHUNK, 2, 0x90, 0x00]);
        assert_eq!(ResponseChunk::from_bytes(&chunk.to_bytes()).unwrap(), chunk);
    }
}
