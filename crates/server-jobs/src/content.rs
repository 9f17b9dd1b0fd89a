// crates/server-jobs/src/content.rs
//! Staging of rendered output and the single-read content handle.
//!
//! A task writes renderer output into a [`StagingSink`]; finishing the sink
//! yields a [`StreamingContent`] of known size. The content handle is
//! consumed by value, so its bytes can be read at most once. Temp-file
//! staging removes its file when the handle (or the stream made from it) is
//! dropped.

use std::fmt;
use std::io;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tempfile::{NamedTempFile, TempPath};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

/// Stream of output chunks produced by [`StreamingContent::into_stream`].
pub type ContentStream = BoxStream<'static, io::Result<Bytes>>;

/// Where rendered output is held between completion and retrieval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagingMode {
    #[default]
    Memory,
    TempFile,
}

impl FromStr for StagingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "tempfile" | "tmpfile" | "file" => Ok(Self::TempFile),
            other => Err(format!("unknown staging mode '{other}'")),
        }
    }
}

/// Errors raised while staging output.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("output exceeds the {limit} byte limit")]
    LimitExceeded { limit: u64 },

    #[error("staging I/O error: {0}")]
    Io(#[from] io::Error),
}

enum SinkBuffer {
    Memory(BytesMut),
    TempFile {
        file: tokio::fs::File,
        path: TempPath,
    },
}

/// Write side of staging, handed to the renderer.
pub struct StagingSink {
    buffer: SinkBuffer,
    written: u64,
    limit: Option<u64>,
}

impl StagingSink {
    /// Open a sink for `mode`. `limit` bounds the total bytes accepted.
    ///
    /// Temp-file creation runs on the blocking pool.
    pub async fn open(mode: StagingMode, limit: Option<u64>) -> Result<Self, StagingError> {
        let buffer = match mode {
            StagingMode::Memory => SinkBuffer::Memory(BytesMut::new()),
            StagingMode::TempFile => {
                let temp = tokio::task::spawn_blocking(NamedTempFile::new)
                    .await
                    .map_err(io::Error::other)??;
                let (file, path) = temp.into_parts();
                SinkBuffer::TempFile {
                    file: tokio::fs::File::from_std(file),
                    path,
                }
            }
        };
        Ok(Self {
            buffer,
            written: 0,
            limit,
        })
    }

    /// Append a chunk of output.
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), StagingError> {
        let len = chunk.len() as u64;
        if let Some(limit) = self.limit {
            if self.written.saturating_add(len) > limit {
                return Err(StagingError::LimitExceeded { limit });
            }
        }
        match &mut self.buffer {
            SinkBuffer::Memory(buf) => buf.extend_from_slice(chunk),
            SinkBuffer::TempFile { file, .. } => file.write_all(chunk).await?,
        }
        self.written += len;
        Ok(())
    }

    /// Bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Seal the sink into a content handle.
    pub async fn finish(self, mime_type: impl Into<String>) -> Result<StreamingContent, StagingError> {
        let body = match self.buffer {
            SinkBuffer::Memory(buf) => ContentBody::Memory(buf.freeze()),
            SinkBuffer::TempFile { mut file, path } => {
                file.flush().await?;
                file.sync_all().await?;
                ContentBody::TempFile(path)
            }
        };
        Ok(StreamingContent {
            size: self.written,
            mime_type: mime_type.into(),
            body,
        })
    }
}

enum ContentBody {
    Memory(Bytes),
    TempFile(TempPath),
}

/// Finished output of a job: a byte source plus its declared size.
pub struct StreamingContent {
    size: u64,
    mime_type: String,
    body: ContentBody,
}

impl StreamingContent {
    /// In-memory content, mainly for renderers that produce a single buffer.
    pub fn from_bytes(bytes: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        let bytes = bytes.into();
        Self {
            size: bytes.len() as u64,
            mime_type: mime_type.into(),
            body: ContentBody::Memory(bytes),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Consume the handle into a byte stream.
    pub fn into_stream(self) -> ContentStream {
        match self.body {
            ContentBody::Memory(bytes) => {
                futures_util::stream::once(async move { Ok(bytes) }).boxed()
            }
            ContentBody::TempFile(path) => {
                let stream = async_stream::try_stream! {
                    let file = tokio::fs::File::open(&path).await?;
                    let mut chunks = ReaderStream::new(file);
                    while let Some(chunk) = chunks.next().await {
                        yield chunk?;
                    }
                    // The file is unlinked only after the last chunk is read.
                    drop(path);
                };
                stream.boxed()
            }
        }
    }

    /// Consume the handle and collect all bytes.
    pub async fn into_bytes(self) -> io::Result<Bytes> {
        let capacity = usize::try_from(self.size).unwrap_or(0);
        let mut stream = self.into_stream();
        let mut out = BytesMut::with_capacity(capacity);
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out.freeze())
    }
}

impl fmt::Debug for StreamingContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let staging = match self.body {
            ContentBody::Memory(_) => StagingMode::Memory,
            ContentBody::TempFile(_) => StagingMode::TempFile,
        };
        f.debug_struct("StreamingContent")
            .field("size", &self.size)
            .field("mime_type", &self.mime_type)
            .field("staging", &staging)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_staging() {
        let mut sink = StagingSink::open(StagingMode::Memory, None).await.unwrap();
        sink.write(b"region,total\n").await.unwrap();
        sink.write(b"north,42\n").await.unwrap();
        assert_eq!(sink.written(), 22);

        let content = sink.finish("text/csv").await.unwrap();
        assert_eq!(content.size(), 22);
        assert_eq!(content.mime_type(), "text/csv");
        assert_eq!(
            content.into_bytes().await.unwrap(),
            Bytes::from_static(b"region,total\nnorth,42\n")
        );
    }

    #[tokio::test]
    async fn test_tempfile_staging_removes_file_after_read() {
        let mut sink = StagingSink::open(StagingMode::TempFile, None).await.unwrap();
        let path = match &sink.buffer {
            SinkBuffer::TempFile { path, .. } => path.to_path_buf(),
            SinkBuffer::Memory(_) => unreachable!("tempfile staging requested"),
        };
        sink.write(&[7u8; 100_000]).await.unwrap();

        let content = sink.finish("application/pdf").await.unwrap();
        assert_eq!(content.size(), 100_000);
        assert!(path.exists());

        let bytes = content.into_bytes().await.unwrap();
        assert_eq!(bytes.len(), 100_000);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_tempfile_removed_when_content_dropped_unread() {
        let mut sink = StagingSink::open(StagingMode::TempFile, None).await.unwrap();
        let path = match &sink.buffer {
            SinkBuffer::TempFile { path, .. } => path.to_path_buf(),
            SinkBuffer::Memory(_) => unreachable!("tempfile staging requested"),
        };
        sink.write(b"abandoned").await.unwrap();
        let content = sink.finish("text/plain").await.unwrap();

        drop(content);
        assert!(!path.exists());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_tempfile_open_on_current_thread_runtime() {
        let mut sink = StagingSink::open(StagingMode::TempFile, Some(4)).await.unwrap();
        assert!(matches!(sink.buffer, SinkBuffer::TempFile { .. }));
        sink.write(b"abcd").await.unwrap();
        let content = sink.finish("text/plain").await.unwrap();
        assert_eq!(content.into_bytes().await.unwrap(), Bytes::from_static(b"abcd"));
    }

    #[tokio::test]
    async fn test_limit_exceeded() {
        let mut sink = StagingSink::open(StagingMode::Memory, Some(8)).await.unwrap();
        sink.write(b"12345678").await.unwrap();
        let err = sink.write(b"9").await.unwrap_err();
        assert!(matches!(err, StagingError::LimitExceeded { limit: 8 }));
        assert_eq!(sink.written(), 8);
    }

    #[test]
    fn test_staging_mode_from_str() {
        assert_eq!("memory".parse::<StagingMode>(), Ok(StagingMode::Memory));
        assert_eq!("TempFile".parse::<StagingMode>(), Ok(StagingMode::TempFile));
        assert!("disk-ish".parse::<StagingMode>().is_err());
    }

    #[test]
    fn test_debug_hides_payload() {
        let content = StreamingContent::from_bytes("secret payload", "text/plain");
        let debug = format!("{content:?}");
        assert!(debug.contains("size: 14"));
        assert!(!debug.contains("secret"));
    }
}
