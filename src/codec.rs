//! Wire framing for protocol messages
//!
//! Each frame is one JSON record followed by a single `\n`. JSON string
//! escaping guarantees a record never contains a raw newline, so the
//! delimiter is unambiguous. TCP reads may carry partial or several
//! frames; `FrameDecoder` buffers the remainder across reads.

use crate::error::ChatError;
use crate::message::ProtocolMessage;

/// Frame terminator
pub const FRAME_DELIMITER: u8 = b'\n';

/// Upper bound on an undelimited buffer before it is discarded
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Serialize one message into a complete frame
pub fn encode(message: &ProtocolMessage) -> Result<Vec<u8>, ChatError> {
    let mut frame = serde_json::to_vec(message)?;
    frame.push(FRAME_DELIMITER);
    Ok(frame)
}

/// Parse one frame body (without the delimiter)
pub fn decode(frame: &[u8]) -> Result<ProtocolMessage, ChatError> {
    serde_json::from_slice(frame).map_err(|e| ChatError::MalformedFrame(e.to_string()))
}

/// Stateful decoder that reassembles frames across reads
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly read bytes and take every complete frame they finish
    ///
    /// Malformed frames come back as `Err` entries in their original
    /// position so the caller can log and skip them. Blank lines are ignored.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<ProtocolMessage, ChatError>> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..]
            .iter()
            .position(|&b| b == FRAME_DELIMITER)
        {
            let end = start + offset;
            let body = &self.buffer[start..end];
            if !body.iter().all(u8::is_ascii_whitespace) {
                frames.push(decode(body));
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        if self.buffer.len() > MAX_FRAME_LEN {
            let buffered = self.buffer.len();
            self.buffer.clear();
            frames.push(Err(ChatError::MalformedFrame(format!(
                "{} bytes without a frame delimiter (limit {})",
                buffered, MAX_FRAME_LEN
            ))));
        }

        frames
    }

    /// Bytes held back waiting for a delimiter
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(results: Vec<Result<ProtocolMessage, ChatError>>) -> Vec<ProtocolMessage> {
        results.into_iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_encode_appends_delimiter() {
        let frame = encode(&ProtocolMessage::PartnerConnected).unwrap();
        assert_eq!(frame.last(), Some(&FRAME_DELIMITER));
        assert_eq!(frame.iter().filter(|&&b| b == FRAME_DELIMITER).count(), 1);
    }

    #[test]
    fn test_payload_newlines_are_escaped() {
        let frame = encode(&ProtocolMessage::PartnerMessage("a\nb".to_string())).unwrap();
        assert_eq!(frame.iter().filter(|&&b| b == FRAME_DELIMITER).count(), 1);

        let mut decoder = FrameDecoder::new();
        assert_eq!(
            ok(decoder.push(&frame)),
            vec![ProtocolMessage::PartnerMessage("a\nb".to_string())]
        );
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut bytes = encode(&ProtocolMessage::WaitingForPartner).unwrap();
        bytes.extend(encode(&ProtocolMessage::PartnerConnected).unwrap());
        bytes.extend(encode(&ProtocolMessage::PartnerMessage("hi".to_string())).unwrap());

        let mut decoder = FrameDecoder::new();
        assert_eq!(
            ok(decoder.push(&bytes)),
            vec![
                ProtocolMessage::WaitingForPartner,
                ProtocolMessage::PartnerConnected,
                ProtocolMessage::PartnerMessage("hi".to_string()),
            ]
        );
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_frame_split_across_reads() {
        let frame = encode(&ProtocolMessage::PartnerMessage("split me".to_string())).unwrap();
        let (head, tail) = frame.split_at(7);

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(head).is_empty());
        assert_eq!(decoder.buffered(), head.len());
        assert_eq!(
            ok(decoder.push(tail)),
            vec![ProtocolMessage::PartnerMessage("split me".to_string())]
        );
    }

    #[test]
    fn test_byte_at_a_time() {
        let frame = encode(&ProtocolMessage::PartnerTyping).unwrap();
        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        for byte in &frame {
            decoded.extend(ok(decoder.push(std::slice::from_ref(byte))));
        }
        assert_eq!(decoded, vec![ProtocolMessage::PartnerTyping]);
    }

    #[test]
    fn test_malformed_frame_does_not_poison_neighbours() {
        let mut bytes = encode(&ProtocolMessage::PartnerTyping).unwrap();
        bytes.extend_from_slice(b"{not json}\n");
        bytes.extend(encode(&ProtocolMessage::PartnerDisconnected).unwrap());

        let mut decoder = FrameDecoder::new();
        let results = decoder.push(&bytes);
        assert_eq!(results.len(), 3);
        assert!(matches!(results[0], Ok(ProtocolMessage::PartnerTyping)));
        assert!(matches!(results[1], Err(ChatError::MalformedFrame(_))));
        assert!(matches!(results[2], Ok(ProtocolMessage::PartnerDisconnected)));
    }

    #[test]
    fn test_blank_lines_skipped() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = b"\n\r\n".to_vec();
        bytes.extend(encode(&ProtocolMessage::PartnerConnected).unwrap());
        assert_eq!(ok(decoder.push(&bytes)), vec![ProtocolMessage::PartnerConnected]);
    }

    #[test]
    fn test_oversized_buffer_discarded() {
        let mut decoder = FrameDecoder::new();
        let garbage = vec![b'x'; MAX_FRAME_LEN + 1];
        let results = decoder.push(&garbage);
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(ChatError::MalformedFrame(_))));
        assert_eq!(decoder.buffered(), 0);

        // Decoder keeps working afterwards
        let frame = encode(&ProtocolMessage::WaitingForPartner).unwrap();
        assert_eq!(ok(decoder.push(&frame)), vec![ProtocolMessage::WaitingForPartner]);
    }
}
