use std::path::PathBuf;

use nix::errno::Errno;

/// Errors reported by the tape engine and the drive registry
///
/// Every variant maps to the errno a real st driver would set, see
/// [`TapeError::errno`]. Nothing is retried or swallowed internally - a
/// failed operation leaves the handle open and usable.
#[derive(thiserror::Error, Debug)]
pub enum TapeError {
    #[error("no such volume directory: {0:?}")]
    NotFound(PathBuf),
    #[error("too many open drives (limit {0})")]
    TooManyOpenDrives(usize),
    #[error("no open drive with handle {0}")]
    BadHandle(usize),
    #[error("end of tape")]
    EndOfTape,
    #[error("end of recorded data")]
    EndOfData,
    #[error("block of {block_size} bytes does not fit into {buffer_size} byte buffer")]
    InsufficientBuffer {
        block_size: usize,
        buffer_size: usize,
    },
    #[error("tried to space past end of recorded data")]
    PastRecordedData,
    #[error("tried to space before beginning of recorded data")]
    BeforeRecordedData,
    #[error("operation not supported: {0}")]
    Unsupported(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl TapeError {
    /// The errno value matching the OS call convention at the device
    /// boundary (callers expecting `-1` + errno pairs use this).
    pub fn errno(&self) -> Errno {
        match self {
            TapeError::NotFound(_) => Errno::ENOENT,
            TapeError::TooManyOpenDrives(_) => Errno::EMFILE,
            TapeError::BadHandle(_) => Errno::EBADF,
            TapeError::EndOfTape => Errno::ENOSPC,
            TapeError::EndOfData => Errno::EIO,
            TapeError::InsufficientBuffer { .. } => Errno::ENOMEM,
            TapeError::PastRecordedData => Errno::EIO,
            TapeError::BeforeRecordedData => Errno::EIO,
            TapeError::Unsupported(_) => Errno::ENOTTY,
            TapeError::Io(err) => err
                .raw_os_error()
                .map(Errno::from_i32)
                .unwrap_or(Errno::EIO),
        }
    }
}
