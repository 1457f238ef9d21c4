//! `Content-Length` framing for the backend stream.
//!
//! Each envelope is sent as `Content-Length: N\r\n\r\n{json}`. Other headers
//! are tolerated and ignored. A body that is not valid JSON is consumed in
//! full, so the stream stays aligned and the next frame can still be read.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::ProtocolError;

/// Largest accepted body (16 MiB).
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Largest accepted header block.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

const CONTENT_LENGTH: &str = "Content-Length";

pub struct FrameReader<R> {
    reader: BufReader<R>,
    max_frame: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_frame: MAX_FRAME_BYTES,
        }
    }

    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    /// Next frame's JSON body. `Ok(None)` on EOF between frames.
    pub async fn read_frame(&mut self) -> Result<Option<Value>, ProtocolError> {
        let Some(len) = self.read_header_block().await? else {
            return Ok(None);
        };
        if len > self.max_frame {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_frame,
            });
        }

        let mut body = vec![0u8; len];
        self.reader.read_exact(&mut body).await?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    /// Consume headers up to the blank line and return the body length.
    async fn read_header_block(&mut self) -> Result<Option<usize>, ProtocolError> {
        let mut len = None;
        let mut consumed = 0usize;
        let mut line = String::new();

        loop {
            line.clear();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return if consumed == 0 {
                    Ok(None)
                } else {
                    Err(ProtocolError::UnexpectedEof)
                };
            }
            consumed += n;
            if consumed > MAX_HEADER_BYTES {
                return Err(ProtocolError::HeaderTooLong {
                    max: MAX_HEADER_BYTES,
                });
            }

            let header = line.trim();
            if header.is_empty() {
                break;
            }
            let Some((name, value)) = header.split_once(':') else {
                continue;
            };
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                let value = value.trim();
                len = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| ProtocolError::InvalidContentLength(value.to_string()))?,
                );
            }
        }

        len.map(Some).ok_or(ProtocolError::MissingContentLength)
    }
}

pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Header and body go out in one buffer, then the writer is flushed.
    pub async fn write_frame(&mut self, value: &Value) -> Result<(), ProtocolError> {
        let body = serde_json::to_vec(value)?;
        let mut frame = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len()).into_bytes();
        frame.extend_from_slice(&body);

        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn framed(body: &[u8]) -> Vec<u8> {
        let mut out = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
        out.extend_from_slice(body);
        out
    }

    async fn encode(values: &[Value]) -> Vec<u8> {
        let mut writer = FrameWriter::new(Vec::new());
        for value in values {
            writer.write_frame(value).await.unwrap();
        }
        writer.into_inner()
    }

    #[tokio::test]
    async fn frames_are_read_back_in_order() {
        let command = json!({
            "id": "aura-editor_1_1700000000000",
            "type": "command",
            "target": "system",
            "payload": { "command": "health_check" }
        });
        let event = json!({"id": "b", "type": "event"});
        let bytes = encode(&[command.clone(), event.clone()]).await;

        let mut reader = FrameReader::new(bytes.as_slice());
        assert_eq!(reader.read_frame().await.unwrap(), Some(command));
        assert_eq!(reader.read_frame().await.unwrap(), Some(event));
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn length_counts_utf8_bytes() {
        let bytes = encode(&[json!({"message": "é"})]).await;
        let text = String::from_utf8(bytes).unwrap();
        // {"message":"é"} is 16 bytes but 15 chars.
        assert!(text.starts_with("Content-Length: 16\r\n\r\n"));
    }

    #[tokio::test]
    async fn extra_headers_and_case_are_tolerated() {
        let body = br#"{"id":"x"}"#;
        let mut bytes = format!(
            "content-type: application/json\r\ncontent-length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        bytes.extend_from_slice(body);

        let mut reader = FrameReader::new(bytes.as_slice());
        let value = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(value["id"], "x");
    }

    #[tokio::test]
    async fn bad_json_keeps_the_stream_aligned() {
        let mut bytes = framed(b"not valid json!!!");
        bytes.extend(framed(br#"{"id":"next"}"#));

        let mut reader = FrameReader::new(bytes.as_slice());
        let err = reader.read_frame().await.unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(reader.read_frame().await.unwrap().unwrap()["id"], "next");
    }

    #[tokio::test]
    async fn header_errors() {
        let cases: [(&[u8], fn(&ProtocolError) -> bool); 4] = [
            (b"Content-Type: application/json\r\n\r\n{}", |e| {
                matches!(e, ProtocolError::MissingContentLength)
            }),
            (b"Content-Length: ten\r\n\r\n", |e| {
                matches!(e, ProtocolError::InvalidContentLength(v) if v == "ten")
            }),
            (b"Content-Length: 10\r\n", |e| {
                matches!(e, ProtocolError::UnexpectedEof)
            }),
            (b"Content-Length: 100\r\n\r\nhello", |e| {
                matches!(e, ProtocolError::Io(_))
            }),
        ];
        for (input, expected) in cases {
            let err = FrameReader::new(input).read_frame().await.unwrap_err();
            assert!(expected(&err), "unexpected error {err:?}");
            assert!(!err.is_recoverable());
        }
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected() {
        let header = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        let err = FrameReader::new(header.as_bytes())
            .read_frame()
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));

        let bytes = framed(br#"{"id":"abcdef"}"#);
        let err = FrameReader::new(bytes.as_slice())
            .with_max_frame(4)
            .read_frame()
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { max: 4, .. }));
    }

    #[tokio::test]
    async fn endless_headers_are_rejected() {
        let bytes = "X-Filler: padding\r\n".repeat(1000);
        let err = FrameReader::new(bytes.as_bytes())
            .read_frame()
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::HeaderTooLong { .. }));
    }
}
