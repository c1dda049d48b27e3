use super::ChannelError;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sidecar file guarding the consumer end of a job channel.
pub fn lock_path(fifo: &Path) -> PathBuf {
    let mut name = fifo.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Exclusive claim on a job channel, held for as long as this value lives.
///
/// A FIFO with two readers hands each message to only one of them, so a
/// second monitor on the same path is refused instead. The lock file holds
/// the pid of the owner and is left in place on exit; the lock itself goes
/// away with the process.
#[derive(Debug)]
pub struct ReaderLock {
    path: PathBuf,
    _file: Flock<File>,
}

impl ReaderLock {
    pub fn acquire(fifo: &Path) -> Result<Self, ChannelError> {
        let path = lock_path(fifo);
        let unavailable = |source: io::Error| ChannelError::Unavailable {
            path: fifo.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(unavailable)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(unavailable)?;

        let mut file = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(locked) => locked,
            Err((_, Errno::EWOULDBLOCK)) => {
                return Err(unavailable(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    format!("another monitor holds {}", path.display()),
                )))
            }
            Err((_, errno)) => return Err(unavailable(io::Error::from(errno))),
        };

        file.set_len(0).map_err(unavailable)?;
        writeln!(file, "{}", std::process::id()).map_err(unavailable)?;
        debug!("Locked job channel with {}", path.display());

        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_is_refused_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("run").join("job_adder.fifo");

        let first = ReaderLock::acquire(&fifo).unwrap();
        assert_eq!(first.path(), dir.path().join("run").join("job_adder.fifo.lock"));
        let pid = fs::read_to_string(first.path()).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());

        let err = ReaderLock::acquire(&fifo).unwrap_err();
        assert!(err.is_unavailable());

        drop(first);
        ReaderLock::acquire(&fifo).unwrap();
    }
}
