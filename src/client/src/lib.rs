//! Producer side of the job adder FIFO.
//!
//! Any process that wants a job monitored connects to the FIFO and writes one
//! newline-terminated JSON record per job. Records never exceed `PIPE_BUF`, so
//! submissions from concurrent processes arrive whole.

use bytes::BytesMut;
use joblens_common::constants::PIPE_BUF_BYTES;
use joblens_common::{JobDescriptor, JobId, WireJobDescriptor};
use joblens_ingest::channel::FrameCodec;
use joblens_ingest::{ChannelError, ChannelWriter};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::codec::Encoder;
use tracing::debug;

/// Largest payload a single submission may carry, delimiter excluded.
pub const MAX_PAYLOAD_BYTES: usize = PIPE_BUF_BYTES - 1;

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("failed to serialize job {job_id}: {source}")]
    Serialize {
        job_id: JobId,
        #[source]
        source: serde_json::Error,
    },

    #[error("submission of {len} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { len: usize, limit: usize },

    #[error("submission is not a single frame: {source}")]
    InvalidFrame {
        #[source]
        source: io::Error,
    },

    #[error("failed to write to job channel {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SubmissionError {
    /// True when no monitor is listening on the FIFO.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SubmissionError::Channel(e) if e.is_unavailable())
    }
}

pub struct SubmissionClient {
    writer: ChannelWriter,
    codec: FrameCodec,
    max_payload: usize,
}

impl SubmissionClient {
    /// Connects to a running monitor. Fails immediately if the FIFO is missing
    /// or nobody reads it.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self, SubmissionError> {
        Self::connect_with_limit(path, MAX_PAYLOAD_BYTES)
    }

    /// Like [`connect`](Self::connect), for a monitor whose frame limit is
    /// below `MAX_PAYLOAD_BYTES`. Larger limits are capped at it.
    pub fn connect_with_limit(
        path: impl AsRef<Path>,
        max_payload: usize,
    ) -> Result<Self, SubmissionError> {
        let max_payload = max_payload.min(MAX_PAYLOAD_BYTES);
        Ok(Self {
            writer: ChannelWriter::open(path)?,
            codec: FrameCodec::new(max_payload),
            max_payload,
        })
    }

    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    pub async fn submit(&mut self, descriptor: &JobDescriptor) -> Result<(), SubmissionError> {
        self.submit_wire(&WireJobDescriptor::from(descriptor)).await
    }

    /// Sends a wire record as is, including records with fields left out.
    pub async fn submit_wire(&mut self, wire: &WireJobDescriptor) -> Result<(), SubmissionError> {
        let payload = serde_json::to_vec(wire).map_err(|source| SubmissionError::Serialize {
            job_id: wire.job_id.unwrap_or_default(),
            source,
        })?;
        self.submit_raw(&payload).await
    }

    /// Sends one raw payload. The delimiter is appended here.
    pub async fn submit_raw(&mut self, payload: &[u8]) -> Result<(), SubmissionError> {
        if payload.len() > self.max_payload {
            return Err(SubmissionError::FrameTooLarge {
                len: payload.len(),
                limit: self.max_payload,
            });
        }

        let mut frame = BytesMut::with_capacity(payload.len() + 1);
        self.codec
            .encode(payload, &mut frame)
            .map_err(|source| SubmissionError::InvalidFrame { source })?;

        self.writer
            .write_frame(&frame)
            .await
            .map_err(|source| SubmissionError::Write {
                path: self.writer.path().to_path_buf(),
                source,
            })?;
        debug!("Submitted {} bytes to {}", frame.len(), self.path().display());
        Ok(())
    }
}

/// Connects, sends one job and disconnects.
pub async fn submit(path: impl AsRef<Path>, descriptor: &JobDescriptor) -> Result<(), SubmissionError> {
    SubmissionClient::connect(path)?.submit(descriptor).await
}
