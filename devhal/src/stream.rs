//! Byte stream handle shared by the serial and USB drivers.
//!
//! The stream is split into independently locked reader and writer halves
//! so a pending read never blocks a write.

use devhal_common::hal::driver::HalError;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tracing::debug;

/// Bidirectional byte stream produced by a platform `open`.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteStream for T {}

/// Boxed platform stream.
pub type BoxedStream = Box<dyn ByteStream>;

/// Open stream owned by a connected driver.
pub struct StreamHandle {
    reader: Mutex<Option<ReadHalf<BoxedStream>>>,
    writer: Mutex<Option<WriteHalf<BoxedStream>>>,
}

impl StreamHandle {
    /// Take ownership of an open stream.
    pub fn new(stream: BoxedStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Read whatever is available, up to `max` bytes.
    ///
    /// End of stream is `StreamClosed`.
    pub async fn read_chunk(&self, max: usize) -> Result<Vec<u8>, HalError> {
        let mut guard = self.reader.lock().await;
        let reader = guard
            .as_mut()
            .ok_or_else(|| HalError::StreamClosed("reader released".to_string()))?;

        let mut buf = vec![0u8; max.max(1)];
        match reader.read(&mut buf).await {
            Ok(0) => Err(HalError::StreamClosed("end of stream".to_string())),
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) => Err(map_io_error(e)),
        }
    }

    /// Write all of `data` and flush. Returns the byte count.
    pub async fn write_all(&self, data: &[u8]) -> Result<usize, HalError> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| HalError::StreamClosed("writer released".to_string()))?;

        writer.write_all(data).await.map_err(map_io_error)?;
        writer.flush().await.map_err(map_io_error)?;
        Ok(data.len())
    }

    /// Shut down and drop both halves.
    ///
    /// A half still locked by an in-flight operation is skipped; it is
    /// dropped with the last reference to the handle.
    pub async fn close(&self) -> Result<(), HalError> {
        let mut result = Ok(());

        match self.writer.try_lock() {
            Ok(mut guard) => {
                if let Some(mut writer) = guard.take() {
                    if let Err(e) = writer.shutdown().await {
                        result = Err(HalError::CommunicationError(format!(
                            "Failed to shut down writer: {e}"
                        )));
                    }
                }
            }
            Err(_) => debug!("Writer busy during close, deferring release"),
        }

        match self.reader.try_lock() {
            Ok(mut guard) => {
                guard.take();
            }
            Err(_) => debug!("Reader busy during close, deferring release"),
        }

        result
    }
}

/// Classify an I/O error: a vanished peer is `StreamClosed`, anything else
/// is a communication error on a still-open stream.
pub fn map_io_error(e: io::Error) -> HalError {
    match e.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected => HalError::StreamClosed(e.to_string()),
        _ => HalError::CommunicationError(e.to_string()),
    }
}
