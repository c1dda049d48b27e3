mod fifo;
mod frame;
mod lock;

pub use fifo::{ensure_fifo, ChannelReader, ChannelWriter};
pub use frame::{DiscardReason, Frame, FrameCodec};
pub use lock::{lock_path, ReaderLock};

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// The endpoint does not exist, has no reader, or could not be opened.
    #[error("job channel {} is unavailable: {source}", path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} exists but is not a FIFO", path.display())]
    NotAFifo { path: PathBuf },

    #[error("failed to read from job channel {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ChannelError {
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ChannelError::Unavailable { .. } | ChannelError::NotAFifo { .. }
        )
    }
}
