/*
 * Copyright 2025 Vijaykumar Singh
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Bounded in-memory byte pipe between a decoder and a sink
//!
//! Writes block once `capacity` bytes are unread. Shutting down or dropping
//! the writer gives the reader end-of-stream; dropping the reader makes
//! further writes fail with `BrokenPipe`.

use tokio::io::{AsyncWriteExt, BufWriter, DuplexStream};

pub type PipeReader = DuplexStream;

/// Buffered write end
pub struct PipeWriter {
    inner: BufWriter<DuplexStream>,
}

pub fn bounded_pipe(capacity: usize, write_buffer: usize) -> (PipeWriter, PipeReader) {
    let (write_half, read_half) = tokio::io::duplex(capacity.max(1));
    let writer = PipeWriter {
        inner: BufWriter::with_capacity(write_buffer.max(1), write_half),
    };
    (writer, read_half)
}

impl PipeWriter {
    pub fn writer(&mut self) -> &mut BufWriter<DuplexStream> {
        &mut self.inner
    }

    /// Flush buffered bytes and signal end-of-stream
    ///
    /// Consumes the writer so the pipe end is released even when flushing
    /// fails.
    pub async fn close(mut self) -> std::io::Result<()> {
        let flushed = self.inner.flush().await;
        let shut = self.inner.shutdown().await;
        flushed.and(shut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_reader_sees_eof_after_close() {
        let (mut writer, mut reader) = bounded_pipe(16, 4);
        let producer = async move {
            writer.writer().write_all(b"hello pipe").await.unwrap();
            writer.close().await.unwrap();
        };
        let consumer = async move {
            let mut out = Vec::new();
            reader.read_to_end(&mut out).await.unwrap();
            out
        };

        let ((), out) = tokio::join!(producer, consumer);
        assert_eq!(out, b"hello pipe");
    }

    #[tokio::test]
    async fn test_write_fails_once_reader_is_gone() {
        let (mut writer, reader) = bounded_pipe(4, 1);
        drop(reader);

        let result = async {
            writer.writer().write_all(b"more than four bytes").await?;
            writer.writer().flush().await
        }
        .await;
        assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::BrokenPipe);
    }
}
