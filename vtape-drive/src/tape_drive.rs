use vtape_api_types::DriveStatus;

use crate::TapeError;

/// Abstract tape drive interface
///
/// The original driver family shares this contract between the real SCSI
/// drive, the file backed emulator and an in-memory variant; this crate
/// only ships the file backed implementation ([`crate::FileTapeHandle`]).
/// All counts are numbers of files/records/filemarks, never bytes.
pub trait TapeDrive {
    /// Read one block; 0 bytes means filemark or EOT/EOD, callers query
    /// [`TapeDrive::status`] to disambiguate.
    fn read_block(&mut self, buf: &mut [u8]) -> Result<usize, TapeError>;

    /// Append one block at the current position, truncating any recorded
    /// data behind it first. Returns the number of payload bytes written
    /// (short on end of tape).
    fn write_block(&mut self, buf: &[u8]) -> Result<usize, TapeError>;

    /// Position at beginning of tape (MTREW)
    fn rewind(&mut self) -> Result<(), TapeError>;

    /// Forward space over `count` filemarks (MTFSF)
    fn forward_space_files(&mut self, count: usize) -> Result<(), TapeError>;

    /// Backward space over `count` filemarks (MTBSF)
    ///
    /// Lands at the end of the target file, just before its terminating
    /// filemark - the landing point of a real drive.
    fn backward_space_files(&mut self, count: usize) -> Result<(), TapeError>;

    /// Forward space over `count` records (MTFSR)
    fn forward_space_records(&mut self, count: usize) -> Result<(), TapeError>;

    /// Backward space over `count` records (MTBSR); only `count == 1` is
    /// supported by the emulator.
    fn backward_space_records(&mut self, count: usize) -> Result<(), TapeError>;

    /// Write `count` filemarks (MTWEOF)
    fn write_filemarks(&mut self, count: usize) -> Result<(), TapeError>;

    /// Position at the end of recorded media for appending (MTEOM)
    fn move_to_eom(&mut self) -> Result<(), TapeError>;

    /// Truncate the volume to zero recorded data (MTERASE)
    fn erase_media(&mut self) -> Result<(), TapeError>;

    /// Finalize the volume and put the drive offline (MTOFFL); terminal,
    /// every later operation fails.
    fn set_offline(&mut self) -> Result<(), TapeError>;

    /// Current position and status bits (MTIOCGET)
    fn status(&self) -> DriveStatus;

    /// Current block number (MTIOCPOS); fails while the block number is
    /// indeterminate.
    fn block_position(&self) -> Result<u32, TapeError>;

    /// Finalize the volume and release the backing file
    fn close(&mut self) -> Result<(), TapeError>;
}
