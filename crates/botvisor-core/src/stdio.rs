use futures::Stream;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, FramedRead};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Piped standard streams of a spawned process
#[derive(Default)]
pub struct ProcessStdio {
    pub stdin: Option<BoxedWriter>,
    pub stdout: Option<BoxedReader>,
    pub stderr: Option<BoxedReader>,
}

/// Which pipe a chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Decodes whatever UTF-8 text is available into one chunk per read.
///
/// A multi-byte character split across two reads is held back until the
/// rest of it arrives. Invalid sequences are replaced rather than failing
/// the stream, bot output is not guaranteed to be UTF-8.
#[derive(Debug, Default)]
pub struct Utf8ChunkCodec;

impl Decoder for Utf8ChunkCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        match std::str::from_utf8(src) {
            Ok(s) => {
                let out = s.to_owned();
                src.clear();
                Ok(Some(out))
            }
            // Incomplete trailing character
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                if valid == 0 {
                    return Ok(None);
                }
                let out = String::from_utf8_lossy(&src[..valid]).into_owned();
                src.advance(valid);
                Ok(Some(out))
            }
            Err(e) => {
                let end = e.valid_up_to() + e.error_len().unwrap_or(1);
                let out = String::from_utf8_lossy(&src[..end]).into_owned();
                src.advance(end);
                Ok(Some(out))
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let out = String::from_utf8_lossy(src).into_owned();
        src.clear();
        Ok(Some(out))
    }
}

/// Lazy sequence of text chunks read from one process pipe, ending when the
/// pipe closes.
pub struct OutputChunks {
    kind: StreamKind,
    frames: FramedRead<BoxedReader, Utf8ChunkCodec>,
}

impl OutputChunks {
    pub fn new(kind: StreamKind, reader: BoxedReader) -> Self {
        Self {
            kind,
            frames: FramedRead::with_capacity(reader, Utf8ChunkCodec, 1024),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }
}

impl Stream for OutputChunks {
    type Item = io::Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.frames).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_decode_complete_text() {
        let mut codec = Utf8ChunkCodec;
        let mut buf = BytesMut::from("ready\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("ready\n".to_string()));
        assert!(buf.is_empty());
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_decode_holds_back_split_character() {
        let mut codec = Utf8ChunkCodec;
        // "hé" with the second byte of 'é' missing
        let mut buf = BytesMut::from(&b"h\xc3"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("h".to_string()));
        assert_eq!(&buf[..], b"\xc3");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"\xa9!");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("é!".to_string()));
    }

    #[test]
    fn test_decode_replaces_invalid_bytes() {
        let mut codec = Utf8ChunkCodec;
        let mut buf = BytesMut::from(&b"ok\xffrest"[..]);
        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, "ok\u{fffd}");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("rest".to_string()));
    }

    #[tokio::test]
    async fn test_output_chunks_reads_until_close() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut chunks = OutputChunks::new(StreamKind::Stdout, Box::new(reader));
        assert_eq!(chunks.kind(), StreamKind::Stdout);

        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            writer.write_all(b"one\n").await.unwrap();
            writer.flush().await.unwrap();
        });

        let mut collected = String::new();
        while let Some(chunk) = chunks.next().await {
            collected.push_str(&chunk.unwrap());
        }
        assert_eq!(collected, "one\n");
    }
}
