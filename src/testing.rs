//! Test helpers shared by unit tests

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::codec;
use crate::message::ProtocolMessage;

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Reads protocol frames from the far end of an in-memory stream
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    /// Next frame, or `None` at end-of-stream; panics after a timeout
    pub async fn next(&mut self) -> Option<ProtocolMessage> {
        tokio::time::timeout(FRAME_TIMEOUT, self.read_frame())
            .await
            .expect("timed out waiting for a frame")
    }

    /// Next frame if one arrives within `wait`
    pub async fn next_within(&mut self, wait: Duration) -> Option<ProtocolMessage> {
        tokio::time::timeout(wait, self.read_frame())
            .await
            .ok()
            .flatten()
    }

    async fn read_frame(&mut self) -> Option<ProtocolMessage> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).await.expect("read failed");
        if read == 0 {
            return None;
        }
        Some(codec::decode(line.trim_end().as_bytes()).expect("malformed frame"))
    }
}
