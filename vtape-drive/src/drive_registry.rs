//! Handle table and ioctl style dispatch
//!
//! Maps small integer handles to open tape drives and translates generic
//! positioning requests into engine calls, the way the OS multiplexes
//! open/read/write/ioctl onto the st driver.

use std::sync::{Mutex, MutexGuard};

use vtape_api_types::{DriveStatus, FileTapeDrive, TapeOpCode};

use crate::{open_file_tape_drive, TapeDrive, TapeError};

/// Maximum number of concurrently open drives
pub const VTAPE_MAX_DRIVES: usize = 20;

type Slots = Vec<Option<Box<dyn TapeDrive + Send>>>;

/// Bounded table of open drives
///
/// Construct once per process and share by reference. The slot table is
/// the only shared mutable state; every drive is exclusively owned by its
/// slot, so one mutex around the table is all the locking this needs.
pub struct DriveRegistry {
    slots: Mutex<Slots>,
}

impl DriveRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new((0..VTAPE_MAX_DRIVES).map(|_| None).collect()),
        }
    }

    fn slots(&self) -> MutexGuard<Slots> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a drive on the given volume, returning its handle
    pub fn open(&self, config: &FileTapeDrive) -> Result<usize, TapeError> {
        let drive = open_file_tape_drive(config)?;

        let mut slots = self.slots();
        match slots.iter_mut().enumerate().find(|(_, slot)| slot.is_none()) {
            Some((handle, slot)) => {
                *slot = Some(Box::new(drive));
                Ok(handle)
            }
            None => Err(TapeError::TooManyOpenDrives(VTAPE_MAX_DRIVES)),
        }
    }

    fn with_drive<T>(
        &self,
        handle: usize,
        call: impl FnOnce(&mut (dyn TapeDrive + Send)) -> Result<T, TapeError>,
    ) -> Result<T, TapeError> {
        let mut slots = self.slots();
        let drive = slots
            .get_mut(handle)
            .and_then(|slot| slot.as_mut())
            .ok_or(TapeError::BadHandle(handle))?;
        call(drive.as_mut())
    }

    /// Read one block; 0 bytes signals filemark or EOT/EOD, query
    /// [`DriveRegistry::status`] to disambiguate.
    pub fn read(&self, handle: usize, buf: &mut [u8]) -> Result<usize, TapeError> {
        self.with_drive(handle, |drive| drive.read_block(buf))
    }

    /// Write one block, returning the number of bytes written
    pub fn write(&self, handle: usize, buf: &[u8]) -> Result<usize, TapeError> {
        self.with_drive(handle, |drive| drive.write_block(buf))
    }

    /// Finalize the drive and free its handle
    pub fn close(&self, handle: usize) -> Result<(), TapeError> {
        let mut slots = self.slots();
        let mut drive = slots
            .get_mut(handle)
            .and_then(|slot| slot.take())
            .ok_or(TapeError::BadHandle(handle))?;
        drive.close()
    }

    /// Execute a positioning operation (MTIOCTOP equivalent)
    pub fn op(&self, handle: usize, op: TapeOpCode, count: usize) -> Result<(), TapeError> {
        log::debug!("handle {handle}: {op:?} count={count}");
        self.with_drive(handle, |drive| match op {
            TapeOpCode::Weof => drive.write_filemarks(count),
            TapeOpCode::Fsf => drive.forward_space_files(count),
            TapeOpCode::Bsf => drive.backward_space_files(count),
            TapeOpCode::Fsr => drive.forward_space_records(count),
            TapeOpCode::Bsr => drive.backward_space_records(count),
            TapeOpCode::Rewind => drive.rewind(),
            TapeOpCode::Offline => drive.set_offline(),
            TapeOpCode::Erase => drive.erase_media(),
            TapeOpCode::Eom => drive.move_to_eom(),
            TapeOpCode::Nop | TapeOpCode::Retension => Ok(()),
        })
    }

    /// Like [`DriveRegistry::op`], but decoding a raw st driver operation
    /// number. Unknown codes fail instead of being silently ignored.
    pub fn op_code(&self, handle: usize, code: u16, count: usize) -> Result<(), TapeError> {
        let op = TapeOpCode::try_from(code)
            .map_err(|code| TapeError::Unsupported(format!("tape operation code {code}")))?;
        self.op(handle, op, count)
    }

    /// Drive position and status bits (MTIOCGET equivalent)
    pub fn status(&self, handle: usize) -> Result<DriveStatus, TapeError> {
        self.with_drive(handle, |drive| Ok(drive.status()))
    }

    /// Current block number (MTIOCPOS equivalent)
    pub fn block_position(&self, handle: usize) -> Result<u32, TapeError> {
        self.with_drive(handle, |drive| drive.block_position())
    }
}

impl Default for DriveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Collapse a typed result into the integer + errno pair of the OS call
/// convention: (return value, 0) on success, (-1, errno) on failure.
pub fn os_return(result: Result<i64, TapeError>) -> (i64, i32) {
    match result {
        Ok(value) => (value, 0),
        Err(err) => (-1, err.errno() as i32),
    }
}
