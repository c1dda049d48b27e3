pub const DEFAULT_JOB_ADDER_FIFO: &str = "/tmp/joblens/job_adder.fifo";

/// Byte that terminates every frame written to the job adder FIFO.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Writes of at most this many bytes to a pipe are atomic (POSIX `PIPE_BUF` on Linux).
pub const PIPE_BUF_BYTES: usize = 4096;

pub const DEFAULT_MAX_FRAME_BYTES: usize = PIPE_BUF_BYTES - 1;
pub const DEFAULT_REAPER_INTERVAL_MS: u64 = 1000;
pub const REOPEN_DELAY_MS: u64 = 100;
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Job id under which `joblens run --exec` registers the program it launched.
pub const LAUNCHED_JOB_ID: i64 = 1;
