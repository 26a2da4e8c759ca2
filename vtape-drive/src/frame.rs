//! Frame codec for the backing volume file
//!
//! One frame is a little endian `u64` payload length followed by the
//! payload bytes. A zero length header is a filemark, the logical end of
//! one tape file. True end of the backing file (no header at all) is
//! distinct from a filemark.

use std::io::{self, Read, Seek, SeekFrom, Write};

use proxmox_io::ReadExt;

/// Size of the length header preceding every frame
pub const FRAME_HEADER_SIZE: u64 = 8;

/// One decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// Data frame: `stored` is the recorded payload size, `read` the
    /// number of bytes actually copied out (less than `stored` only when
    /// the backing store is truncated mid frame).
    Data { stored: usize, read: usize },
    /// Zero length frame separating two tape files
    Filemark,
    /// True end of the backing store - no frame was ever written here
    Eof,
}

#[derive(thiserror::Error, Debug)]
pub enum FrameReadError {
    #[error("block of {stored} bytes does not fit into {buffer} byte read buffer")]
    InsufficientBuffer { stored: usize, buffer: usize },
    #[error("{0}")]
    Io(#[from] io::Error),
}

fn read_header<R: Read>(reader: &mut R) -> Result<Option<u64>, io::Error> {
    let mut header = [0u8; FRAME_HEADER_SIZE as usize];
    match reader.read_exact_or_eof(&mut header) {
        Ok(true) => Ok(Some(u64::from_le_bytes(header))),
        // a torn header is the garbage tail of an interrupted write
        Ok(false) => Ok(None),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(err) => Err(err),
    }
}

// Read::read_exact fails on a truncated trailing frame, but the engine
// needs the partial byte count there, so collect what is present.
fn read_avail<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, io::Error> {
    let mut done = 0;
    while done < buf.len() {
        match reader.read(&mut buf[done..]) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(done)
}

/// Read the next frame, copying a data payload into `buf`
///
/// The cursor ends past the frame in every case, including the
/// insufficient buffer error - like a real drive, the block is consumed
/// even when the caller's buffer was too small to receive it.
pub fn read_frame<R: Read + Seek>(reader: &mut R, buf: &mut [u8]) -> Result<Frame, FrameReadError> {
    let stored = match read_header(reader)? {
        None => return Ok(Frame::Eof),
        Some(0) => return Ok(Frame::Filemark),
        Some(size) => size as usize,
    };

    if stored > buf.len() {
        reader.seek(SeekFrom::Current(stored as i64))?;
        return Err(FrameReadError::InsufficientBuffer {
            stored,
            buffer: buf.len(),
        });
    }

    let read = read_avail(reader, &mut buf[..stored])?;
    Ok(Frame::Data { stored, read })
}

/// Read the next frame header and skip over the payload without copying
///
/// Used by the open() scan, forward record spacing and the backward
/// record replay. The cursor ends past the frame.
pub fn scan_frame<R: Read + Seek>(reader: &mut R) -> Result<Frame, io::Error> {
    let stored = match read_header(reader)? {
        None => return Ok(Frame::Eof),
        Some(0) => return Ok(Frame::Filemark),
        Some(size) => size as usize,
    };

    let pos = reader.seek(SeekFrom::Current(0))?;
    let end = reader.seek(SeekFrom::End(0))?;
    let avail = (end - pos) as usize;
    if avail < stored {
        // truncated trailing frame
        reader.seek(SeekFrom::End(0))?;
        return Ok(Frame::Data {
            stored,
            read: avail,
        });
    }
    reader.seek(SeekFrom::Start(pos + stored as u64))?;
    Ok(Frame::Data { stored, read: 0 })
}

/// Append one data frame
///
/// The header always records the full payload size, but no more than
/// `limit` payload bytes are written - this reproduces the short write a
/// real drive performs when it runs against the end of the media. Returns
/// the number of payload bytes written.
pub fn write_data_frame<W: Write>(
    writer: &mut W,
    payload: &[u8],
    limit: usize,
) -> Result<usize, io::Error> {
    if payload.is_empty() {
        proxmox_lang::io_bail!("refusing to write an empty data frame");
    }
    let count = payload.len().min(limit);
    writer.write_all(&(payload.len() as u64).to_le_bytes())?;
    writer.write_all(&payload[..count])?;
    Ok(count)
}

/// Append one filemark frame
pub fn write_filemark<W: Write>(writer: &mut W) -> Result<(), io::Error> {
    writer.write_all(&0u64.to_le_bytes())
}
