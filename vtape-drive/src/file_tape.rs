//! File backed tape drive emulation
//!
//! Reproduces the positioning model of the Linux st driver on top of an
//! ordinary file, for regression testing tape handling logic without
//! hardware. Tapes cannot be edited in place: writing anywhere but the
//! end of the recorded data truncates everything behind the write point.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use proxmox_sys::fs::{open_file_locked, CreateOptions};

use vtape_api_types::{DriveStatus, FileTapeDrive};

use crate::frame::{self, Frame, FrameReadError, FRAME_HEADER_SIZE};
use crate::{PositionState, TapeDrive, TapeError, VTAPE_BLOCK_SIZE, VTAPE_DENSITY_CODE};

/// This needs to lock the volume
pub fn open_file_tape_drive(config: &FileTapeDrive) -> Result<FileTapeHandle, TapeError> {
    let path = PathBuf::from(&config.path);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            return Err(TapeError::NotFound(parent.to_owned()));
        }
    }

    let mut lock_path = path.as_os_str().to_owned();
    lock_path.push(".lck");

    let timeout = Duration::new(10, 0);
    let lock = open_file_locked(&PathBuf::from(lock_path), timeout, true, CreateOptions::new())
        .map_err(|err| {
            TapeError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("open drive '{}' failed - {}", config.path, err),
            ))
        })?;

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&path)?;

    let (file_offsets, end_of_data) = scan_volume(&mut file)?;
    file.seek(SeekFrom::Start(0))?;

    let mut pos = PositionState::new();
    pos.last_file = (file_offsets.len() - 1) as i32;

    log::debug!(
        "opened volume {:?}: last_file={} end_of_data={}",
        path,
        pos.last_file,
        end_of_data
    );

    Ok(FileTapeHandle {
        volume: path,
        file: Some(file),
        _lock: Some(lock),
        max_size: config.max_size,
        pos,
        file_offsets,
        end_of_data,
        online: true,
    })
}

/// Replay the whole volume once to find the file boundaries
///
/// Returns the byte offset of the first frame of each tape file plus the
/// end of the recorded data. O(number of frames) - the format has no
/// index, like real tape media.
fn scan_volume(file: &mut File) -> Result<(Vec<u64>, u64), io::Error> {
    let mut offsets = vec![0u64];
    let mut pos = 0u64;

    file.seek(SeekFrom::Start(0))?;
    loop {
        match frame::scan_frame(file)? {
            Frame::Eof => break,
            Frame::Filemark => {
                pos += FRAME_HEADER_SIZE;
                offsets.push(pos);
            }
            Frame::Data { .. } => {
                pos = file.stream_position()?;
            }
        }
    }

    Ok((offsets, pos))
}

fn offline_error() -> TapeError {
    TapeError::Io(proxmox_lang::io_format_err!("drive is offline"))
}

/// One open file backed tape drive
pub struct FileTapeHandle {
    volume: PathBuf,
    file: Option<File>,
    _lock: Option<File>,
    max_size: Option<u64>,
    pos: PositionState,
    /// Byte offset of the first frame of each tape file; index == file
    /// number, length == `last_file + 1`
    file_offsets: Vec<u64>,
    end_of_data: u64,
    online: bool,
}

impl FileTapeHandle {
    /// Open a volume with default settings (no size limit)
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TapeError> {
        let config = FileTapeDrive::new(path.as_ref().to_string_lossy().into_owned());
        open_file_tape_drive(&config)
    }

    pub fn volume_path(&self) -> &Path {
        &self.volume
    }

    fn cursor(&mut self) -> Result<u64, TapeError> {
        let file = self.file.as_mut().ok_or_else(offline_error)?;
        Ok(file.stream_position()?)
    }

    /// Emulate the append only behavior of tape media: everything after
    /// the write point is discarded.
    fn truncate_media(&mut self, at: u64) -> Result<(), TapeError> {
        let file = self.file.as_mut().ok_or_else(offline_error)?;
        file.set_len(at)?;
        self.end_of_data = at;
        self.file_offsets.truncate(self.pos.current_file as usize + 1);
        self.pos.last_file = self.pos.current_file;
        self.pos.at_eod = true;
        log::debug!(
            "truncate {}:{} at offset {}",
            self.pos.current_file,
            self.pos.current_block,
            at
        );
        Ok(())
    }

    /// Terminate the current file if a write left it open
    fn finalize_media(&mut self) -> Result<(), TapeError> {
        if self.pos.needs_filemark && self.file.is_some() {
            self.write_filemarks(1)?;
        }
        Ok(())
    }
}

impl TapeDrive for FileTapeHandle {
    fn read_block(&mut self, buf: &mut [u8]) -> Result<usize, TapeError> {
        if self.file.is_none() {
            return Err(offline_error());
        }
        if self.pos.at_eot || self.pos.at_eod {
            return Ok(0);
        }

        loop {
            let file = self.file.as_mut().ok_or_else(offline_error)?;
            match frame::read_frame(file, buf) {
                Ok(Frame::Filemark) => {
                    if self.pos.at_eof {
                        // boundary was already reported, cross it silently
                        self.pos.at_eof = false;
                        continue;
                    }
                    // do not consume the boundary on the read that
                    // detects it, a real drive re-observes the filemark
                    file.seek(SeekFrom::Current(-(FRAME_HEADER_SIZE as i64)))?;
                    self.pos.at_eof = true;
                    self.pos.at_bot = false;
                    self.pos.current_file += 1;
                    self.pos.current_block = 0;
                    return Ok(0);
                }
                Ok(Frame::Eof) => {
                    self.pos.at_eof = true;
                    if self.pos.current_file == self.pos.last_file {
                        self.pos.at_eod = true;
                        self.pos.current_block = -1;
                    }
                    return Ok(0);
                }
                Ok(Frame::Data { stored, read }) => {
                    self.pos.at_bot = false;
                    self.pos.at_eof = false;
                    if self.pos.current_block != -1 {
                        self.pos.current_block += 1;
                    }
                    if read < stored {
                        // backing store ends in the middle of the frame
                        log::debug!("EOF during reading");
                        self.pos.at_eof = true;
                        if self.pos.current_file == self.pos.last_file {
                            self.pos.at_eod = true;
                            self.pos.current_block = -1;
                        }
                    }
                    return Ok(read);
                }
                Err(FrameReadError::InsufficientBuffer { stored, buffer }) => {
                    // the block is gone anyway, like on real hardware
                    if self.pos.current_block != -1 {
                        self.pos.current_block += 1;
                    }
                    return Err(TapeError::InsufficientBuffer {
                        block_size: stored,
                        buffer_size: buffer,
                    });
                }
                Err(FrameReadError::Io(err)) => return Err(err.into()),
            }
        }
    }

    fn write_block(&mut self, buf: &[u8]) -> Result<usize, TapeError> {
        if self.file.is_none() {
            return Err(offline_error());
        }
        if buf.is_empty() {
            return Err(TapeError::Io(proxmox_lang::io_format_err!(
                "zero length tape write"
            )));
        }
        if self.pos.at_eot {
            return Err(TapeError::EndOfTape);
        }

        let cursor = self.cursor()?;
        if !self.pos.at_eod {
            self.truncate_media(cursor)?;
        }

        let limit = match self.max_size {
            Some(max) => {
                if max.saturating_sub(cursor) <= FRAME_HEADER_SIZE {
                    self.pos.at_eot = true;
                    return Err(TapeError::EndOfTape);
                }
                (max - cursor - FRAME_HEADER_SIZE) as usize
            }
            None => usize::MAX,
        };

        let file = self.file.as_mut().ok_or_else(offline_error)?;
        let written = frame::write_data_frame(file, buf, limit)?;
        self.end_of_data = file.stream_position()?;

        if self.pos.current_block != -1 {
            self.pos.current_block += 1;
        }
        self.pos.at_bot = false;
        self.pos.at_eof = false;
        self.pos.at_eod = true;
        self.pos.needs_filemark = true;

        if written < buf.len() {
            log::debug!(
                "not enough space, writing only {} of {} requested",
                written,
                buf.len()
            );
            self.pos.at_eot = true;
        }

        Ok(written)
    }

    fn rewind(&mut self) -> Result<(), TapeError> {
        let file = self.file.as_mut().ok_or_else(offline_error)?;
        file.seek(SeekFrom::Start(0))?;
        self.pos.needs_filemark = false;
        self.pos.reset_to_bot();
        Ok(())
    }

    fn forward_space_files(&mut self, count: usize) -> Result<(), TapeError> {
        if self.file.is_none() {
            return Err(offline_error());
        }
        if count == 0 {
            return Ok(());
        }
        self.pos.needs_filemark = false;

        if self.pos.at_eot {
            self.pos.current_block = -1;
            return Err(TapeError::PastRecordedData);
        }

        self.pos.at_bot = false;
        self.pos.at_eof = false;

        let target = self.pos.current_file as i64 + count as i64;
        if target <= self.pos.last_file as i64 {
            let offset = self.file_offsets[target as usize];
            let file = self.file.as_mut().ok_or_else(offline_error)?;
            file.seek(SeekFrom::Start(offset))?;
            self.pos.current_file = target as i32;
            self.pos.current_block = 0;
            self.pos.at_eod = offset == self.end_of_data;
            Ok(())
        } else {
            log::debug!("try to FSF after end of recorded data");
            let end = self.end_of_data;
            let file = self.file.as_mut().ok_or_else(offline_error)?;
            file.seek(SeekFrom::Start(end))?;
            self.pos.current_file = self.pos.last_file;
            self.pos.current_block = -1;
            self.pos.at_eod = true;
            Err(TapeError::PastRecordedData)
        }
    }

    fn backward_space_files(&mut self, count: usize) -> Result<(), TapeError> {
        if self.file.is_none() {
            return Err(offline_error());
        }
        if count == 0 {
            return Ok(());
        }
        self.pos.needs_filemark = false;

        self.pos.at_bot = false;
        self.pos.at_eof = false;
        self.pos.at_eot = false;
        self.pos.at_eod = false;

        if count as i64 > self.pos.current_file as i64 {
            let file = self.file.as_mut().ok_or_else(offline_error)?;
            file.seek(SeekFrom::Start(0))?;
            self.pos.current_file = 0;
            self.pos.current_block = 0;
            self.pos.at_bot = true;
            return Err(TapeError::BeforeRecordedData);
        }

        let target = self.pos.current_file - count as i32;
        // land at the EOT side of the target file, just before the
        // filemark that terminates it
        let offset = self.file_offsets[(target + 1) as usize] - FRAME_HEADER_SIZE;
        let file = self.file.as_mut().ok_or_else(offline_error)?;
        file.seek(SeekFrom::Start(offset))?;
        self.pos.current_file = target;
        self.pos.current_block = -1;
        Ok(())
    }

    fn forward_space_records(&mut self, count: usize) -> Result<(), TapeError> {
        if self.file.is_none() {
            return Err(offline_error());
        }
        if count == 0 {
            return Ok(());
        }
        self.pos.needs_filemark = false;

        if self.pos.at_eot {
            self.pos.current_block = -1;
            return Err(TapeError::PastRecordedData);
        }
        if self.pos.at_eod {
            return Err(TapeError::EndOfData);
        }

        self.pos.at_bot = false;
        let mut pending_eof = std::mem::take(&mut self.pos.at_eof);

        let mut result = Ok(());
        let mut spaced = 0;
        while spaced < count {
            let file = self.file.as_mut().ok_or_else(offline_error)?;
            match frame::scan_frame(file)? {
                Frame::Data { .. } => {
                    pending_eof = false;
                    if self.pos.current_block != -1 {
                        self.pos.current_block += 1;
                    }
                    spaced += 1;
                }
                Frame::Filemark => {
                    if pending_eof {
                        // boundary already reported by a previous read
                        pending_eof = false;
                        continue;
                    }
                    // ran into the next file
                    self.pos.current_file += 1;
                    self.pos.current_block = 0;
                    self.pos.at_eof = true;
                    result = Err(TapeError::PastRecordedData);
                    break;
                }
                Frame::Eof => {
                    self.pos.at_eof = true;
                    if self.pos.current_file == self.pos.last_file {
                        self.pos.at_eod = true;
                        self.pos.current_block = -1;
                    }
                    result = Err(TapeError::PastRecordedData);
                    break;
                }
            }
        }

        if self.cursor()? == self.end_of_data {
            self.pos.at_eod = true;
        }
        result
    }

    fn backward_space_records(&mut self, count: usize) -> Result<(), TapeError> {
        if self.file.is_none() {
            return Err(offline_error());
        }
        if count == 0 {
            return Ok(());
        }
        if count != 1 {
            return Err(TapeError::Unsupported(format!(
                "backward space over {count} records (only 1 supported)"
            )));
        }
        self.pos.needs_filemark = false;

        let orig = self.cursor()?;
        let orig_file = self.pos.current_file;
        let orig_block = self.pos.current_block;

        // The frame encoding is forward only, so replay the current file
        // from its start and remember the last frame before the original
        // offset.
        let start = self.file_offsets[self.pos.current_file as usize];
        let file = self.file.as_mut().ok_or_else(offline_error)?;
        file.seek(SeekFrom::Start(start))?;

        let mut replay_pos = start;
        let mut block = 0i32;
        let mut prev: Option<(u64, i32)> = None;

        while replay_pos < orig {
            match frame::scan_frame(file)? {
                Frame::Data { .. } => {
                    prev = Some((replay_pos, block));
                    replay_pos = file.stream_position()?;
                    block += 1;
                }
                _ => break,
            }
        }

        match prev {
            Some((offset, block)) => {
                file.seek(SeekFrom::Start(offset))?;
                self.pos.current_block = block;
                self.pos.at_eot = false;
                self.pos.at_eof = false;
                self.pos.at_eod = false;
                log::debug!("bsr {}:{}", self.pos.current_file, self.pos.current_block);
                Ok(())
            }
            None => {
                // nothing before the original position in this file
                file.seek(SeekFrom::Start(orig))?;
                self.pos.current_file = orig_file;
                self.pos.current_block = orig_block;
                Err(TapeError::BeforeRecordedData)
            }
        }
    }

    fn write_filemarks(&mut self, count: usize) -> Result<(), TapeError> {
        if self.file.is_none() {
            return Err(offline_error());
        }
        if count == 0 {
            // WEOF 0 only flushes drive buffers on real hardware
            return Ok(());
        }
        if self.pos.at_eot {
            self.pos.current_block = -1;
            return Err(TapeError::EndOfTape);
        }
        self.pos.needs_filemark = false;

        // nothing after this point survives
        let cursor = self.cursor()?;
        self.truncate_media(cursor)?;

        if let Some(max) = self.max_size {
            if max.saturating_sub(cursor) < FRAME_HEADER_SIZE * count as u64 {
                self.pos.at_eot = true;
                self.pos.current_block = -1;
                return Err(TapeError::EndOfTape);
            }
        }

        log::debug!(
            "writing {} EOF marks at {}:{} last={}",
            count,
            self.pos.current_file,
            self.pos.current_block,
            self.pos.last_file
        );

        let file = self.file.as_mut().ok_or_else(offline_error)?;
        let mut pos = cursor;
        for _ in 0..count {
            frame::write_filemark(file)?;
            pos += FRAME_HEADER_SIZE;
            self.file_offsets.push(pos);
        }
        self.end_of_data = pos;

        self.pos.current_file += count as i32;
        self.pos.current_block = 0;
        self.pos.last_file = (self.file_offsets.len() - 1) as i32;
        self.pos.at_bot = false;
        self.pos.at_eod = false;
        self.pos.at_eof = true;
        Ok(())
    }

    fn move_to_eom(&mut self) -> Result<(), TapeError> {
        let end = self.end_of_data;
        let file = self.file.as_mut().ok_or_else(offline_error)?;
        file.seek(SeekFrom::Start(end))?;

        self.pos.current_file = self.pos.last_file;
        self.pos.current_block = -1;
        self.pos.at_bot = false;
        self.pos.at_eof = false;
        self.pos.at_eot = false;
        self.pos.at_eod = true;
        Ok(())
    }

    fn erase_media(&mut self) -> Result<(), TapeError> {
        let file = self.file.as_mut().ok_or_else(offline_error)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;

        self.file_offsets = vec![0];
        self.end_of_data = 0;
        self.pos.needs_filemark = false;
        self.pos.current_file = 0;
        self.pos.current_block = -1;
        self.pos.last_file = 0;
        self.pos.at_bot = false;
        self.pos.at_eof = false;
        self.pos.at_eot = false;
        self.pos.at_eod = true;
        Ok(())
    }

    fn set_offline(&mut self) -> Result<(), TapeError> {
        self.finalize_media()?;
        self.file = None;
        self._lock = None;
        self.online = false;

        self.pos.current_file = -1;
        self.pos.current_block = -1;
        self.pos.last_file = -1;
        self.pos.at_bot = false;
        self.pos.at_eof = false;
        self.pos.at_eot = false;
        self.pos.at_eod = false;
        Ok(())
    }

    fn status(&self) -> DriveStatus {
        DriveStatus {
            file_number: self.pos.current_file as i64,
            block_number: self.pos.current_block as i64,
            at_bot: self.pos.at_bot,
            at_eof: self.pos.at_eof,
            at_eot: self.pos.at_eot,
            at_eod: self.pos.at_eod,
            online: self.online,
            status_bits: self.pos.status_flags(self.online).bits(),
            density: VTAPE_DENSITY_CODE,
            block_size: VTAPE_BLOCK_SIZE,
        }
    }

    fn block_position(&self) -> Result<u32, TapeError> {
        if self.pos.current_block >= 0 {
            Ok(self.pos.current_block as u32)
        } else {
            Err(TapeError::Io(proxmox_lang::io_format_err!(
                "block number is indeterminate"
            )))
        }
    }

    fn close(&mut self) -> Result<(), TapeError> {
        self.finalize_media()?;
        self.file = None;
        self._lock = None;
        self.online = false;
        Ok(())
    }
}

impl Drop for FileTapeHandle {
    // Try to make sure the last file ends with a filemark
    fn drop(&mut self) {
        let _ = self.finalize_media();
    }
}
