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

//! One decoder wired to one sink through a bounded pipe
//!
//! Both halves run concurrently so no file is held in memory. The producer
//! closes its end of the pipe on every exit path, which is what lets the
//! consumer finish instead of waiting forever on a failed decode.

use std::time::Instant;
use tokio::io::AsyncReadExt;

use super::decoder::Decoder;
use super::pipe::{bounded_pipe, PipeReader, PipeWriter};
use super::sink::Sink;
use crate::core::config::DumperConfig;
use crate::core::error::{MigrationError, Result};
use crate::core::types::ArrayHeader;

/// Outcome of a successful worker run
#[derive(Debug, Clone, Copy)]
pub struct WorkReport {
    pub header: ArrayHeader,
    pub bytes_stored: u64,
}

pub struct Worker {
    decoder: Box<dyn Decoder>,
    sink: Box<dyn Sink>,
    pipe_capacity: usize,
    write_buffer: usize,
}

impl Worker {
    pub fn new(decoder: Box<dyn Decoder>, sink: Box<dyn Sink>, config: &DumperConfig) -> Self {
        Self {
            decoder,
            sink,
            pipe_capacity: config.pipe_capacity_bytes(),
            write_buffer: config.writer_buffer_bytes(),
        }
    }

    /// Decode and store one file; no retries
    pub async fn work(self) -> Result<WorkReport> {
        let Worker {
            mut decoder,
            mut sink,
            pipe_capacity,
            write_buffer,
        } = self;
        let started = Instant::now();
        let source = decoder.name().to_string();
        let target = sink.target().to_string();
        tracing::debug!("🔧 [WORKER] {} -> {}", source, target);

        let (writer, reader) = bounded_pipe(pipe_capacity, write_buffer);
        let (produced, consumed) = tokio::join!(
            produce(decoder.as_mut(), writer),
            consume(sink.as_mut(), reader)
        );

        match (produced, consumed) {
            (Ok(header), Ok(bytes_stored)) => {
                tracing::info!(
                    "✅ [WORKER] {} -> {} ({} rows, {} bytes) in {:?}",
                    source,
                    target,
                    header.emitted_rows(),
                    bytes_stored,
                    started.elapsed()
                );
                Ok(WorkReport { header, bytes_stored })
            }
            // A broken pipe only means the consumer went away first
            (Err(e), Err(sink_err)) if e.is_broken_pipe() => {
                tracing::error!("❌ [WORKER] Sink {} failed: {}", target, sink_err);
                Err(sink_err)
            }
            (Err(e), _) => {
                tracing::error!("❌ [WORKER] Decoder {} failed: {}", source, e);
                Err(e)
            }
            (Ok(_), Err(e)) => {
                tracing::error!("❌ [WORKER] Sink {} failed: {}", target, e);
                Err(e)
            }
        }
    }
}

async fn produce(decoder: &mut dyn Decoder, mut writer: PipeWriter) -> Result<ArrayHeader> {
    let published = publish(decoder, &mut writer).await;
    // Always release the pipe so the consumer sees end-of-stream
    let closed = writer.close().await;

    match (published, closed) {
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(MigrationError::Io(e)),
        (Ok(header), Ok(())) => Ok(header),
    }
}

async fn publish(decoder: &mut dyn Decoder, writer: &mut PipeWriter) -> Result<ArrayHeader> {
    decoder.before_publish().await?;
    let published = decoder.publish_to(writer.writer()).await;
    let released = decoder.after_publish().await;

    let header = published?;
    released?;
    Ok(header)
}

async fn consume(sink: &mut dyn Sink, mut reader: PipeReader) -> Result<u64> {
    let result = sink.execute(&mut reader).await;
    if result.is_ok() {
        // A sink that stops early must not leave the producer blocked
        let mut rest = Vec::new();
        let trailing = reader.read_to_end(&mut rest).await?;
        if trailing > 0 {
            return Err(MigrationError::Internal(format!(
                "sink {} left {} bytes unread",
                sink.target(),
                trailing
            )));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

    use crate::core::types::ElementType;
    use parking_lot::Mutex;

    struct ScriptedDecoder {
        chunks: usize,
        fail_after: Option<usize>,
        released: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl Decoder for ScriptedDecoder {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn before_publish(&mut self) -> Result<()> {
            Ok(())
        }

        async fn publish_to(&mut self, writer: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<ArrayHeader> {
            for i in 0..self.chunks {
                if self.fail_after == Some(i) {
                    return Err(MigrationError::DecodeFormat("scripted failure".to_string()));
                }
                writer.write_all(&[i as u8; 1024]).await?;
            }
            Ok(ArrayHeader::new(self.chunks, 1024, ElementType::Int32))
        }

        async fn after_publish(&mut self) -> Result<()> {
            *self.released.lock() = true;
            Ok(())
        }
    }

    struct CollectingSink {
        collected: Arc<Mutex<Vec<u8>>>,
        fail: bool,
    }

    #[async_trait]
    impl Sink for CollectingSink {
        fn target(&self) -> &str {
            "memory"
        }

        async fn execute(&mut self, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
            if self.fail {
                return Err(MigrationError::Storage(crate::storage::StorageError::Network(
                    "upload refused".to_string(),
                )));
            }
            let mut buf = Vec::new();
            let n = reader.read_to_end(&mut buf).await?;
            self.collected.lock().extend_from_slice(&buf);
            Ok(n as u64)
        }
    }

    fn small_pipe() -> DumperConfig {
        DumperConfig {
            pipe_capacity_kb: 1,
            writer_buffer_kb: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_worker_streams_through_small_pipe() {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let released = Arc::new(Mutex::new(false));
        let decoder = ScriptedDecoder {
            chunks: 64,
            fail_after: None,
            released: released.clone(),
        };
        let sink = CollectingSink {
            collected: collected.clone(),
            fail: false,
        };

        let report = Worker::new(Box::new(decoder), Box::new(sink), &small_pipe())
            .work()
            .await
            .unwrap();
        assert_eq!(report.bytes_stored, 64 * 1024);
        assert_eq!(collected.lock().len(), 64 * 1024);
        assert!(*released.lock());
    }

    #[tokio::test]
    async fn test_decoder_failure_terminates_sink_and_is_returned() {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let released = Arc::new(Mutex::new(false));
        let decoder = ScriptedDecoder {
            chunks: 64,
            fail_after: Some(10),
            released: released.clone(),
        };
        let sink = CollectingSink {
            collected: collected.clone(),
            fail: false,
        };

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            Worker::new(Box::new(decoder), Box::new(sink), &small_pipe()).work(),
        )
        .await
        .expect("worker must not hang");

        assert!(matches!(result, Err(MigrationError::DecodeFormat(_))));
        assert_eq!(collected.lock().len(), 10 * 1024);
        assert!(*released.lock());
    }

    #[tokio::test]
    async fn test_sink_failure_is_returned_not_broken_pipe() {
        let decoder = ScriptedDecoder {
            chunks: 64,
            fail_after: None,
            released: Arc::new(Mutex::new(false)),
        };
        let sink = CollectingSink {
            collected: Arc::new(Mutex::new(Vec::new())),
            fail: true,
        };

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            Worker::new(Box::new(decoder), Box::new(sink), &small_pipe()).work(),
        )
        .await
        .expect("worker must not hang");

        assert!(matches!(result, Err(MigrationError::Storage(_))));
    }
}
