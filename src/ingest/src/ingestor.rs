use crate::channel::{ChannelError, ChannelReader, DiscardReason, Frame, ReaderLock};
use crate::decoder::{decode, DecodeError};
use crate::validator::{DuplicatePolicy, Rejection, Validator};
use joblens_common::constants::{DEFAULT_MAX_FRAME_BYTES, REOPEN_DELAY_MS};
use joblens_common::JobId;
use joblens_registry::JobRegistry;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub max_frame_bytes: usize,
    pub duplicate_policy: DuplicatePolicy,
    /// Pause before reopening the channel after end-of-stream or a read error.
    pub reopen_delay: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            duplicate_policy: DuplicatePolicy::default(),
            reopen_delay: Duration::from_millis(REOPEN_DELAY_MS),
        }
    }
}

/// Counters kept by the ingestion loop. `accepted` counts new jobs and
/// `updated` counts accepted submissions that replaced an existing job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub accepted: u64,
    pub updated: u64,
    pub rejected: u64,
    pub malformed: u64,
    pub discarded: u64,
}

/// What happened to a single frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted { job_id: JobId, replaced: bool },
    Rejected(Rejection),
    Undecodable(DecodeError),
    Discarded { len: usize, reason: DiscardReason },
}

/// Reads job submissions off the job adder FIFO and registers the valid ones.
///
/// The ingestor is the consumer end of the channel. A bad frame is logged and
/// counted, then skipped; it never stops the loop.
pub struct JobIngestor {
    _lock: ReaderLock,
    reader: ChannelReader,
    registry: Arc<JobRegistry>,
    validator: Validator,
    options: IngestOptions,
    stats: IngestStats,
}

impl JobIngestor {
    /// Claims the channel, creates the FIFO if needed and opens it, so writers
    /// can connect as soon as this returns. Fails with
    /// [`ChannelError::Unavailable`] while another ingestor holds the channel.
    pub fn bind(
        path: impl AsRef<Path>,
        registry: Arc<JobRegistry>,
        options: IngestOptions,
    ) -> Result<Self, ChannelError> {
        let path = path.as_ref();
        let lock = ReaderLock::acquire(path)?;
        let reader = ChannelReader::open(path, options.max_frame_bytes)?;
        info!("Listening for job submissions on {}", reader.path().display());

        Ok(Self {
            _lock: lock,
            reader,
            registry,
            validator: Validator::new(options.duplicate_policy),
            options,
            stats: IngestStats::default(),
        })
    }

    pub fn path(&self) -> &Path {
        self.reader.path()
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Runs until `cancel` fires. Only an unrecoverable channel problem (the
    /// path being replaced by something that is not a FIFO) ends it early.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<IngestStats, ChannelError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.reader.read_next() => next,
            };

            match next {
                Ok(Some(frame)) => {
                    self.handle_frame(frame).await;
                }
                Ok(None) => {
                    debug!("All writers closed {}, reopening", self.path().display());
                    if !self.reopen(&cancel).await? {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                    if !self.reopen(&cancel).await? {
                        break;
                    }
                }
            }
        }

        info!(
            accepted = self.stats.accepted,
            updated = self.stats.updated,
            rejected = self.stats.rejected,
            malformed = self.stats.malformed,
            discarded = self.stats.discarded,
            "Job ingestion stopped"
        );
        Ok(self.stats)
    }

    /// Reopens the channel, retrying until it succeeds. Returns `false` if
    /// cancelled while waiting.
    async fn reopen(&mut self, cancel: &CancellationToken) -> Result<bool, ChannelError> {
        let path: PathBuf = self.path().to_path_buf();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(self.options.reopen_delay) => {}
            }

            match ChannelReader::open(&path, self.options.max_frame_bytes) {
                Ok(reader) => {
                    self.reader = reader;
                    return Ok(true);
                }
                Err(e @ ChannelError::NotAFifo { .. }) => return Err(e),
                Err(e) => warn!("Failed to reopen job channel: {e}"),
            }
        }
    }

    pub async fn handle_frame(&mut self, frame: Frame) -> IngestOutcome {
        match frame {
            Frame::Message(payload) => self.ingest_message(&payload).await,
            Frame::Discarded { len, reason } => {
                self.stats.discarded += 1;
                warn!(
                    "Discarded {len} bytes from job channel ({reason:?}, limit {} bytes)",
                    self.options.max_frame_bytes
                );
                IngestOutcome::Discarded { len, reason }
            }
        }
    }

    /// Decodes, validates and registers one frame payload.
    pub async fn ingest_message(&mut self, payload: &[u8]) -> IngestOutcome {
        let descriptor = match decode(payload) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                self.stats.malformed += 1;
                match e.job_id() {
                    Some(job_id) => warn!(job_id, "Dropped job submission: {e}"),
                    None => warn!("Dropped job submission: {e}"),
                }
                return IngestOutcome::Undecodable(e);
            }
        };

        match self.validator.validate(descriptor, &self.registry).await {
            Ok(accepted) => {
                let job_id = accepted.entry.job_id;
                info!(
                    job_id,
                    pids = ?accepted.entry.pids,
                    created_at = %accepted.entry.created_at,
                    "{} job",
                    if accepted.replaces { "Updated" } else { "Registered" }
                );
                let replaced = self.registry.upsert(accepted.entry).await.is_some();
                if replaced {
                    self.stats.updated += 1;
                } else {
                    self.stats.accepted += 1;
                }
                IngestOutcome::Accepted { job_id, replaced }
            }
            Err(rejection) => {
                self.stats.rejected += 1;
                warn!(job_id = rejection.job_id(), "Rejected job submission: {rejection}");
                IngestOutcome::Rejected(rejection)
            }
        }
    }
}
