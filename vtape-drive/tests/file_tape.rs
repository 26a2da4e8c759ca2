use anyhow::{bail, Error};
use lazy_static::lazy_static;
use tempfile::TempDir;

use vtape_api_types::FileTapeDrive;
use vtape_drive::{open_file_tape_drive, FileTapeHandle, TapeDrive, TapeError};

lazy_static! {
    static ref TEST_BLOCKS: Vec<Vec<u8>> = {
        let mut blocks = Vec::new();
        for i in 0..10u32 {
            let len = 100 + (i as usize) * 37;
            blocks.push((0..len).map(|n| ((n as u32 + i) % 251) as u8).collect());
        }
        blocks
    };
}

fn scratch_volume(dir: &TempDir, name: &str) -> FileTapeDrive {
    FileTapeDrive::new(dir.path().join(name).to_string_lossy().into_owned())
}

fn read_one(handle: &mut FileTapeHandle) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; 64 * 1024];
    let count = handle.read_block(&mut buf)?;
    buf.truncate(count);
    Ok(buf)
}

fn expect_position(handle: &FileTapeHandle, file: i64, block: i64) -> Result<(), Error> {
    let status = handle.status();
    if status.file_number != file || status.block_number != block {
        bail!(
            "unexpected position {}:{} (expected {}:{})",
            status.file_number,
            status.block_number,
            file,
            block
        );
    }
    Ok(())
}

#[test]
fn round_trip() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let mut handle = open_file_tape_drive(&scratch_volume(&dir, "tape0"))?;

    for block in TEST_BLOCKS.iter() {
        let written = handle.write_block(block)?;
        assert_eq!(written, block.len());
    }

    handle.rewind()?;
    assert!(handle.status().at_bot);

    for (i, block) in TEST_BLOCKS.iter().enumerate() {
        let data = read_one(&mut handle)?;
        assert_eq!(&data, block, "block {i} differs");
        expect_position(&handle, 0, (i + 1) as i64)?;
    }

    Ok(())
}

#[test]
fn write_weof_read_scenario() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let mut handle = open_file_tape_drive(&scratch_volume(&dir, "tape0"))?;

    assert_eq!(handle.write_block(b"AAAA")?, 4);
    assert_eq!(handle.write_block(b"BBBB")?, 4);
    handle.write_filemarks(1)?;
    assert_eq!(handle.write_block(b"CCCC")?, 4);

    handle.rewind()?;

    assert_eq!(read_one(&mut handle)?, b"AAAA");
    expect_position(&handle, 0, 1)?;

    assert_eq!(read_one(&mut handle)?, b"BBBB");
    expect_position(&handle, 0, 2)?;

    // crossing the filemark reports 0 bytes and the new file number
    assert_eq!(read_one(&mut handle)?, b"");
    assert!(handle.status().at_eof);
    expect_position(&handle, 1, 0)?;

    assert_eq!(read_one(&mut handle)?, b"CCCC");
    expect_position(&handle, 1, 1)?;

    Ok(())
}

#[test]
fn filemark_idempotence() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let mut handle = open_file_tape_drive(&scratch_volume(&dir, "tape0"))?;

    handle.write_block(b"data")?;
    handle.write_filemarks(1)?;
    handle.rewind()?;

    assert_eq!(read_one(&mut handle)?, b"data");
    assert_eq!(read_one(&mut handle)?, b""); // the filemark
    expect_position(&handle, 1, 0)?;

    // nothing was recorded after the filemark: every further read
    // returns 0 bytes and the file number stays put
    for _ in 0..4 {
        assert_eq!(read_one(&mut handle)?, b"");
        assert_eq!(handle.status().file_number, 1);
    }
    assert!(handle.status().at_eod);

    Ok(())
}

#[test]
fn truncate_on_write() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let mut handle = open_file_tape_drive(&scratch_volume(&dir, "tape0"))?;

    handle.write_block(b"one")?;
    handle.write_block(b"two")?;
    handle.write_block(b"three")?;

    handle.rewind()?;
    assert_eq!(read_one(&mut handle)?, b"one");

    // tapes cannot be edited in place - this discards "two" and "three"
    handle.write_block(b"NEW")?;

    handle.rewind()?;
    assert_eq!(read_one(&mut handle)?, b"one");
    assert_eq!(read_one(&mut handle)?, b"NEW");
    assert_eq!(read_one(&mut handle)?, b"");
    assert!(handle.status().at_eod);
    assert_eq!(read_one(&mut handle)?, b"");

    Ok(())
}

#[test]
fn fsf_boundary() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let mut handle = open_file_tape_drive(&scratch_volume(&dir, "tape0"))?;

    handle.write_block(b"file zero")?;
    handle.write_filemarks(1)?;
    handle.write_block(b"file one")?;
    handle.rewind()?;

    handle.forward_space_files(1)?;
    expect_position(&handle, 1, 0)?;
    assert_eq!(read_one(&mut handle)?, b"file one");

    handle.rewind()?;
    handle.forward_space_files(1)?;
    match handle.forward_space_files(1) {
        Err(TapeError::PastRecordedData) => {}
        other => bail!("unexpected fsf result: {other:?}"),
    }
    assert_eq!(handle.status().block_number, -1);
    assert!(handle.status().at_eod);

    Ok(())
}

#[test]
fn bsr_single_step() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let mut handle = open_file_tape_drive(&scratch_volume(&dir, "tape0"))?;

    handle.write_block(b"first")?;
    handle.write_block(b"second")?;
    handle.rewind()?;

    assert_eq!(read_one(&mut handle)?, b"first");
    assert_eq!(read_one(&mut handle)?, b"second");

    handle.backward_space_records(1)?;
    expect_position(&handle, 0, 1)?;
    assert_eq!(read_one(&mut handle)?, b"second");

    // only a single step backward is implemented
    match handle.backward_space_records(2) {
        Err(TapeError::Unsupported(_)) => {}
        other => bail!("unexpected bsr(2) result: {other:?}"),
    }

    // nothing before the first record of the file
    handle.rewind()?;
    match handle.backward_space_records(1) {
        Err(TapeError::BeforeRecordedData) => {}
        other => bail!("unexpected bsr at BOT result: {other:?}"),
    }

    Ok(())
}

#[test]
fn eom_then_append() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let mut handle = open_file_tape_drive(&scratch_volume(&dir, "tape0"))?;

    handle.write_block(b"old data")?;
    handle.write_filemarks(1)?;

    handle.rewind()?;
    handle.move_to_eom()?;
    assert!(handle.status().at_eod);
    handle.write_block(b"appended")?;

    handle.rewind()?;
    handle.forward_space_files(1)?;
    assert_eq!(read_one(&mut handle)?, b"appended");

    Ok(())
}

#[test]
fn bsf_lands_before_filemark() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let mut handle = open_file_tape_drive(&scratch_volume(&dir, "tape0"))?;

    handle.write_block(b"aaa")?;
    handle.write_filemarks(1)?;
    handle.write_block(b"bbb")?;
    handle.write_filemarks(1)?;

    handle.backward_space_files(1)?;
    // landed at the EOT side of file 1, block number indeterminate
    expect_position(&handle, 1, -1)?;

    // the next read observes the terminating filemark of file 1
    assert_eq!(read_one(&mut handle)?, b"");
    assert!(handle.status().at_eof);
    expect_position(&handle, 2, 0)?;

    // spacing backward across BOT clamps to the very beginning
    match handle.backward_space_files(5) {
        Err(TapeError::BeforeRecordedData) => {}
        other => bail!("unexpected bsf result: {other:?}"),
    }
    assert!(handle.status().at_bot);
    expect_position(&handle, 0, 0)?;
    assert_eq!(read_one(&mut handle)?, b"aaa");

    Ok(())
}

#[test]
fn fsr_crosses_into_next_file() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let mut handle = open_file_tape_drive(&scratch_volume(&dir, "tape0"))?;

    handle.write_block(b"r1")?;
    handle.write_block(b"r2")?;
    handle.write_block(b"r3")?;
    handle.write_filemarks(1)?;
    handle.write_block(b"r4")?;
    handle.rewind()?;

    handle.forward_space_records(2)?;
    expect_position(&handle, 0, 2)?;
    assert_eq!(read_one(&mut handle)?, b"r3");

    handle.rewind()?;
    // asks for 4 records but a filemark is in the way: error, with the
    // head transparently moved to the start of the next file
    match handle.forward_space_records(4) {
        Err(TapeError::PastRecordedData) => {}
        other => bail!("unexpected fsr result: {other:?}"),
    }
    expect_position(&handle, 1, 0)?;
    assert_eq!(read_one(&mut handle)?, b"r4");

    // spacing at end of data fails distinctly
    assert_eq!(read_one(&mut handle)?, b"");
    assert!(handle.status().at_eod);
    match handle.forward_space_records(1) {
        Err(TapeError::EndOfData) => {}
        other => bail!("unexpected fsr at EOD result: {other:?}"),
    }

    Ok(())
}

#[test]
fn insufficient_read_buffer_consumes_block() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let mut handle = open_file_tape_drive(&scratch_volume(&dir, "tape0"))?;

    handle.write_block(&[9u8; 4096])?;
    handle.write_block(b"small")?;
    handle.rewind()?;

    let mut buf = vec![0u8; 16];
    match handle.read_block(&mut buf) {
        Err(TapeError::InsufficientBuffer {
            block_size,
            buffer_size,
        }) => {
            assert_eq!(block_size, 4096);
            assert_eq!(buffer_size, 16);
        }
        other => bail!("unexpected read result: {other:?}"),
    }

    // the oversized block was consumed, like on real hardware
    expect_position(&handle, 0, 1)?;
    assert_eq!(read_one(&mut handle)?, b"small");

    Ok(())
}

#[test]
fn end_of_tape_on_full_volume() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let mut config = scratch_volume(&dir, "tape0");
    config.max_size = Some(40);
    let mut handle = open_file_tape_drive(&config)?;

    // 8 byte header + 16 byte payload
    assert_eq!(handle.write_block(&[1u8; 16])?, 16);

    // only 8 payload bytes fit before the end of the media
    let written = handle.write_block(&[2u8; 16])?;
    assert_eq!(written, 8);
    assert!(handle.status().at_eot);

    match handle.write_block(&[3u8; 16]) {
        Err(TapeError::EndOfTape) => {}
        other => bail!("unexpected write result: {other:?}"),
    }

    // rewind clears the EOT condition and the data reads back
    handle.rewind()?;
    assert_eq!(read_one(&mut handle)?, vec![1u8; 16]);

    Ok(())
}

#[test]
fn erase_resets_volume() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let mut handle = open_file_tape_drive(&scratch_volume(&dir, "tape0"))?;

    handle.write_block(b"doomed")?;
    handle.write_filemarks(1)?;
    handle.write_block(b"also doomed")?;

    handle.erase_media()?;
    expect_position(&handle, 0, -1)?;
    assert!(handle.status().at_eod);

    handle.rewind()?;
    assert_eq!(read_one(&mut handle)?, b"");
    assert!(handle.status().at_eod);

    // the volume is usable again after an erase
    handle.write_block(b"fresh start")?;
    handle.rewind()?;
    assert_eq!(read_one(&mut handle)?, b"fresh start");

    Ok(())
}

#[test]
fn offline_is_terminal() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let mut handle = open_file_tape_drive(&scratch_volume(&dir, "tape0"))?;

    handle.write_block(b"data")?;
    handle.set_offline()?;

    let status = handle.status();
    assert!(!status.online);
    assert_eq!(status.file_number, -1);
    assert_eq!(status.block_number, -1);

    assert!(handle.rewind().is_err());
    assert!(handle.write_block(b"more").is_err());
    let mut buf = [0u8; 16];
    assert!(handle.read_block(&mut buf).is_err());

    Ok(())
}

#[test]
fn close_finalizes_open_file() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let config = scratch_volume(&dir, "tape0");

    {
        let mut handle = open_file_tape_drive(&config)?;
        handle.write_block(b"unterminated")?;
        handle.close()?;
    }

    // the pending filemark was appended on close, so the reopened volume
    // has one data file plus an empty file open for appending
    let mut handle = open_file_tape_drive(&config)?;
    assert_eq!(read_one(&mut handle)?, b"unterminated");
    assert_eq!(read_one(&mut handle)?, b"");
    expect_position(&handle, 1, 0)?;
    assert_eq!(read_one(&mut handle)?, b"");
    assert!(handle.status().at_eod);

    Ok(())
}

#[test]
fn volume_persists_across_opens() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let config = scratch_volume(&dir, "tape0");

    {
        let mut handle = open_file_tape_drive(&config)?;
        handle.write_block(b"AAAA")?;
        handle.write_block(b"BBBB")?;
        handle.write_filemarks(1)?;
        handle.write_block(b"CCCC")?;
        handle.close()?;
    }

    let mut handle = open_file_tape_drive(&config)?;
    assert!(handle.status().at_bot);

    assert_eq!(read_one(&mut handle)?, b"AAAA");
    assert_eq!(read_one(&mut handle)?, b"BBBB");
    assert_eq!(read_one(&mut handle)?, b"");
    assert_eq!(read_one(&mut handle)?, b"CCCC");

    // appending after end of data extends the volume
    handle.move_to_eom()?;
    handle.write_block(b"DDDD")?;
    handle.rewind()?;
    handle.forward_space_files(2)?;
    assert_eq!(read_one(&mut handle)?, b"DDDD");

    Ok(())
}

#[test]
fn open_requires_volume_directory() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let config = scratch_volume(&dir, "no/such/dir/tape0");

    match open_file_tape_drive(&config) {
        Err(TapeError::NotFound(_)) => Ok(()),
        Err(other) => bail!("unexpected open error: {other:?}"),
        Ok(_) => bail!("open succeeded without the volume directory"),
    }
}
