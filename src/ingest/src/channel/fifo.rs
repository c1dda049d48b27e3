use super::{ChannelError, Frame, FrameCodec};
use futures_util::StreamExt;
use joblens_common::constants::PIPE_BUF_BYTES;
use nix::errno::Errno;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::net::unix::pipe;
use tokio_util::codec::FramedRead;
use tracing::info;

fn unavailable(path: &Path, source: io::Error) -> ChannelError {
    ChannelError::Unavailable {
        path: path.to_path_buf(),
        source,
    }
}

fn is_fifo(path: &Path) -> io::Result<bool> {
    fs::metadata(path).map(|meta| meta.file_type().is_fifo())
}

/// Creates the FIFO (and its parent directory) unless it already exists.
pub fn ensure_fifo(path: &Path) -> Result<(), ChannelError> {
    match is_fifo(path) {
        Ok(true) => return Ok(()),
        Ok(false) => {
            return Err(ChannelError::NotAFifo {
                path: path.to_path_buf(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => return Err(unavailable(path, source)),
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| unavailable(path, source))?;
    }

    match mkfifo(path, Mode::from_bits_truncate(0o666)) {
        Ok(()) => {
            info!("Created job channel at {}", path.display());
            Ok(())
        }
        // lost a creation race against another process
        Err(Errno::EEXIST) => match is_fifo(path) {
            Ok(true) => Ok(()),
            Ok(false) => Err(ChannelError::NotAFifo {
                path: path.to_path_buf(),
            }),
            Err(source) => Err(unavailable(path, source)),
        },
        Err(errno) => Err(unavailable(path, io::Error::from(errno))),
    }
}

#[cfg(target_os = "linux")]
fn open_receiver(path: &Path) -> io::Result<pipe::Receiver> {
    // Holding a write end ourselves means the FIFO never reports end-of-stream
    // when the last writer goes away, and writers can always find a reader.
    pipe::OpenOptions::new()
        .read_write(true)
        .open_receiver(path)
}

#[cfg(not(target_os = "linux"))]
fn open_receiver(path: &Path) -> io::Result<pipe::Receiver> {
    pipe::OpenOptions::new().open_receiver(path)
}

/// Consumer end of the job channel. Only the monitor opens one.
pub struct ChannelReader {
    path: PathBuf,
    frames: FramedRead<pipe::Receiver, FrameCodec>,
}

impl ChannelReader {
    /// Creates the FIFO if needed and opens it for reading without waiting for
    /// a writer. Must be called from within a tokio runtime.
    pub fn open(path: impl AsRef<Path>, max_frame_bytes: usize) -> Result<Self, ChannelError> {
        let path = path.as_ref();
        ensure_fifo(path)?;
        let receiver = open_receiver(path).map_err(|source| unavailable(path, source))?;

        Ok(Self {
            path: path.to_path_buf(),
            frames: FramedRead::new(receiver, FrameCodec::new(max_frame_bytes)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits for the next frame. `Ok(None)` means end-of-stream: every writer
    /// closed and the reader does not hold a write end of its own.
    pub async fn read_next(&mut self) -> Result<Option<Frame>, ChannelError> {
        self.frames
            .next()
            .await
            .transpose()
            .map_err(|source| ChannelError::Read {
                path: self.path.clone(),
                source,
            })
    }
}

/// Producer end of the job channel.
pub struct ChannelWriter {
    path: PathBuf,
    sender: pipe::Sender,
}

impl ChannelWriter {
    /// Opens an existing FIFO for writing. Fails right away when the FIFO does
    /// not exist or no reader has it open.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ChannelError> {
        let path = path.as_ref();
        let sender = pipe::OpenOptions::new()
            .open_sender(path)
            .map_err(|source| unavailable(path, source))?;

        Ok(Self {
            path: path.to_path_buf(),
            sender,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one complete frame. Frames of at most `PIPE_BUF_BYTES` go out in
    /// a single atomic write, so concurrent writers never interleave.
    pub async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        if frame.len() > PIPE_BUF_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "frame of {} bytes exceeds the {} byte atomic write limit",
                    frame.len(),
                    PIPE_BUF_BYTES
                ),
            ));
        }
        self.sender.write_all(frame).await?;
        self.sender.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn fifo_path(dir: &TempDir) -> PathBuf {
        dir.path().join("run").join("job_adder.fifo")
    }

    async fn next_message(reader: &mut ChannelReader) -> Bytes {
        match timeout(Duration::from_secs(5), reader.read_next()).await {
            Ok(Ok(Some(Frame::Message(payload)))) => payload,
            other => panic!("expected a message, got {:?}", other.map(|r| r.map_err(|e| e.to_string()))),
        }
    }

    #[test]
    fn test_ensure_fifo_creates_and_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let path = fifo_path(&dir);

        ensure_fifo(&path).unwrap();
        assert!(is_fifo(&path).unwrap());
        ensure_fifo(&path).unwrap();
    }

    #[test]
    fn test_ensure_fifo_refuses_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain");
        fs::write(&path, b"not a pipe").unwrap();

        let err = ensure_fifo(&path).unwrap_err();
        assert!(matches!(err, ChannelError::NotAFifo { .. }));
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_writer_fails_when_fifo_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChannelWriter::open(fifo_path(&dir)).err().unwrap();
        assert!(matches!(err, ChannelError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_writer_fails_without_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = fifo_path(&dir);
        ensure_fifo(&path).unwrap();

        let err = ChannelWriter::open(&path).err().unwrap();
        match err {
            ChannelError::Unavailable { source, .. } => {
                assert_eq!(source.raw_os_error(), Some(nix::libc::ENXIO))
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn test_frames_flow_from_writer_to_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = fifo_path(&dir);
        let mut reader = ChannelReader::open(&path, 1024).unwrap();

        let mut writer = ChannelWriter::open(&path).unwrap();
        writer.write_frame(b"first\nsecond\n").await.unwrap();

        assert_eq!(next_message(&mut reader).await, Bytes::from_static(b"first"));
        assert_eq!(next_message(&mut reader).await, Bytes::from_static(b"second"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_reader_outlives_writers() {
        let dir = tempfile::tempdir().unwrap();
        let path = fifo_path(&dir);
        let mut reader = ChannelReader::open(&path, 1024).unwrap();

        {
            let mut writer = ChannelWriter::open(&path).unwrap();
            writer.write_frame(b"one\n").await.unwrap();
        }
        assert_eq!(next_message(&mut reader).await, Bytes::from_static(b"one"));

        let mut late_writer = ChannelWriter::open(&path).unwrap();
        late_writer.write_frame(b"two\n").await.unwrap();
        assert_eq!(next_message(&mut reader).await, Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn test_write_frame_refuses_non_atomic_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = fifo_path(&dir);
        let _reader = ChannelReader::open(&path, 1024).unwrap();
        let mut writer = ChannelWriter::open(&path).unwrap();

        let oversized = vec![b'x'; PIPE_BUF_BYTES + 1];
        let err = writer.write_frame(&oversized).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
