// src/bus/source.rs

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::sync::mpsc;
use tracing::debug;

use crate::bus::envelope::RawEnvelope;
use crate::errors::Result;

/// Where bus envelopes come from.
///
/// `Ok(None)` means the bus is closed and no further envelope will arrive.
/// An `Err` concerns a single envelope; callers may keep reading. An
/// [`FleetError::IoError`](crate::errors::FleetError::IoError) means the
/// read itself failed and may well fail again.
pub trait EventSource: Send {
    fn next_envelope(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<RawEnvelope>>> + Send + '_>>;
}

type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;

/// Reads one JSON envelope per line from a file, FIFO or stdin.
pub struct JsonLinesSource {
    lines: Lines<BufReader<BoxedReader>>,
}

impl JsonLinesSource {
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let boxed: BoxedReader = Box::new(reader);
        Self {
            lines: BufReader::new(boxed).lines(),
        }
    }

    /// Open `path`, or stdin when `path` is `-`.
    pub async fn open(path: &Path) -> Result<Self> {
        if path == Path::new("-") {
            return Ok(Self::from_reader(tokio::io::stdin()));
        }
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::from_reader(file))
    }
}

impl EventSource for JsonLinesSource {
    fn next_envelope(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<RawEnvelope>>> + Send + '_>> {
        Box::pin(async move {
            while let Some(line) = self.lines.next_line().await? {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                debug!(line, "bus line");
                let envelope: RawEnvelope = serde_json::from_str(line)?;
                return Ok(Some(envelope));
            }
            Ok(None)
        })
    }
}

/// Envelopes pushed through an in-process channel.
pub struct ChannelSource {
    rx: mpsc::Receiver<RawEnvelope>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<RawEnvelope>) -> Self {
        Self { rx }
    }

    /// A source plus the sender feeding it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<RawEnvelope>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

impl EventSource for ChannelSource {
    fn next_envelope(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<RawEnvelope>>> + Send + '_>> {
        Box::pin(async move { Ok(self.rx.recv().await) })
    }
}
