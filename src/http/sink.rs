//! Output sinks
//!
//! A request writes its body either into memory or into a file created on a
//! [`WriteDevice`]. File sinks are flushed and shut down before the
//! completion callback runs.

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

/// Writer handed out by a [`WriteDevice`].
pub type DeviceWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A write-capable destination that can create named files.
#[async_trait]
pub trait WriteDevice: Send + Sync {
    async fn create(&self, name: &str) -> io::Result<DeviceWriter>;
}

/// Creates files below a root directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalDevice {
    root: PathBuf,
}

impl LocalDevice {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, name: &str) -> io::Result<PathBuf> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));

        if name.is_empty() || escapes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid destination name: {name:?}"),
            ));
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl WriteDevice for LocalDevice {
    async fn create(&self, name: &str) -> io::Result<DeviceWriter> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = File::create(&path).await?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Where a request's body should go, chosen at request creation.
#[derive(Clone)]
pub enum SinkTarget {
    Memory,
    File {
        device: Arc<dyn WriteDevice>,
        name: String,
    },
}

impl SinkTarget {
    /// Destination name for log lines.
    pub fn destination(&self) -> &str {
        match self {
            SinkTarget::Memory => "memory",
            SinkTarget::File { name, .. } => name,
        }
    }
}

impl fmt::Debug for SinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkTarget::Memory => f.write_str("Memory"),
            SinkTarget::File { name, .. } => f.debug_struct("File").field("name", name).finish(),
        }
    }
}

/// An opened sink.
pub enum OutputSink {
    Memory(BytesMut),
    File { name: String, writer: DeviceWriter },
}

impl OutputSink {
    /// Opens the sink. For files this creates the destination.
    pub async fn open(target: SinkTarget) -> io::Result<Self> {
        match target {
            SinkTarget::Memory => Ok(OutputSink::Memory(BytesMut::new())),
            SinkTarget::File { device, name } => {
                let writer = device.create(&name).await?;
                Ok(OutputSink::File { name, writer })
            }
        }
    }

    pub async fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            OutputSink::Memory(buf) => {
                buf.extend_from_slice(bytes);
                Ok(())
            }
            OutputSink::File { writer, .. } => writer.write_all(bytes).await,
        }
    }

    /// Closes the sink. Memory sinks yield their contents; file sinks are
    /// flushed, shut down and yield nothing.
    pub async fn finalize(self) -> io::Result<Bytes> {
        match self {
            OutputSink::Memory(buf) => Ok(buf.freeze()),
            OutputSink::File { mut writer, .. } => {
                writer.shutdown().await?;
                Ok(Bytes::new())
            }
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, OutputSink::File { .. })
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputSink::Memory(buf) => f.debug_tuple("Memory").field(&buf.len()).finish(),
            OutputSink::File { name, .. } => f.debug_struct("File").field("name", name).finish(),
        }
    }
}
