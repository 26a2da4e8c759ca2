//! File backed emulation of the Linux SCSI tape ("st") driver
//!
//! A volume is an ordinary file holding a flat sequence of frames. Each
//! frame is a little endian `u64` length header followed by that many
//! payload bytes; a zero length header is a filemark. There is no volume
//! header and no index - the format is self describing and has to be
//! replayed frame by frame, like real tape media.
//!
//! The [`FileTapeHandle`] engine reproduces the positioning model of the
//! st driver (filemarks, BOT/EOF/EOT/EOD, MTFSF/MTBSF/MTFSR/MTBSR/MTWEOF/
//! MTREW/MTEOM/MTOFFL) closely enough that software written against real
//! tape ioctls can run its regression tests on plain files.

mod tape_error;
pub use tape_error::TapeError;

pub mod frame;
pub use frame::{Frame, FrameReadError, FRAME_HEADER_SIZE};

mod position;
pub use position::{PositionState, StatusFlags};

mod tape_drive;
pub use tape_drive::TapeDrive;

mod file_tape;
pub use file_tape::{open_file_tape_drive, FileTapeHandle};

mod drive_registry;
pub use drive_registry::{os_return, DriveRegistry, VTAPE_MAX_DRIVES};

/// Density code reported by the emulated drive
pub const VTAPE_DENSITY_CODE: u32 = 1;

/// Block size reported by the emulated drive
pub const VTAPE_BLOCK_SIZE: u32 = 1024;
