/// Control virtual tape drive operation
///
/// An 'mt' style command line tool for file backed tape volumes, mainly
/// useful to inspect and prepare volumes for regression tests.
///
/// Features:
///
/// - the full positioning command set (fsf/bsf/fsr/bsr/weof/eod/...)
/// - optional json output format for status
/// - raw block read/write for round-trip checks
///
/// A real drive keeps its head position while the device is open; since
/// every vmt invocation is a fresh open (which starts at BOT), the head
/// position is carried between invocations in a '<volume>.pos' sidecar
/// file and restored before the command runs.
use std::io::Write;

use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use proxmox_router::cli::*;
use proxmox_schema::{api, IntegerSchema, Schema};
use proxmox_sys::fs::{file_get_json, replace_file, CreateOptions};

use vtape_api_types::{FileTapeDrive, VOLUME_PATH_SCHEMA};
use vtape_drive::{open_file_tape_drive, FileTapeHandle, TapeDrive};

pub const FILE_MARK_COUNT_SCHEMA: Schema = IntegerSchema::new("File mark count.")
    .minimum(1)
    .maximum(i32::MAX as isize)
    .schema();

pub const FILE_MARK_POSITION_SCHEMA: Schema = IntegerSchema::new("File mark position (0 is BOT).")
    .minimum(0)
    .maximum(i32::MAX as isize)
    .schema();

pub const RECORD_COUNT_SCHEMA: Schema = IntegerSchema::new("Record count.")
    .minimum(1)
    .maximum(i32::MAX as isize)
    .schema();

/// Largest block `rb` is willing to receive
const READ_BUFFER_SIZE: usize = 4 * 1024 * 1024;

#[derive(Serialize, Deserialize, Default)]
struct DrivePosition {
    file: i64,
    block: i64,
    eod: bool,
}

fn position_file_path(volume: &str) -> String {
    format!("{volume}.pos")
}

fn load_position(volume: &str) -> Result<DrivePosition, Error> {
    let default = serde_json::to_value(DrivePosition::default())?;
    let data = file_get_json(position_file_path(volume), Some(default))?;
    let position: DrivePosition = serde_json::from_value(data)?;
    Ok(position)
}

fn store_position(volume: &str, handle: &FileTapeHandle) -> Result<(), Error> {
    let status = handle.status();
    let position = DrivePosition {
        file: status.file_number,
        block: status.block_number,
        eod: status.at_eod,
    };
    let raw = serde_json::to_string_pretty(&serde_json::to_value(&position)?)?;
    replace_file(
        position_file_path(volume),
        raw.as_bytes(),
        CreateOptions::new(),
        false,
    )?;
    Ok(())
}

fn drop_position(volume: &str) {
    let _ = std::fs::remove_file(position_file_path(volume));
}

/// Move the freshly opened handle back to where the last invocation left
/// the head. Best effort - a volume changed behind our back simply leaves
/// the head wherever the clamped positioning ends up.
fn restore_position(handle: &mut FileTapeHandle, position: &DrivePosition) {
    if position.eod {
        if let Err(err) = handle.move_to_eom() {
            log::warn!("restoring position (eod) failed - {err}");
        }
        return;
    }
    if position.file > 0 {
        if let Err(err) = handle.forward_space_files(position.file as usize) {
            log::warn!("restoring position (file {}) failed - {err}", position.file);
            return;
        }
    }
    if position.block > 0 {
        if let Err(err) = handle.forward_space_records(position.block as usize) {
            log::warn!(
                "restoring position (block {}) failed - {err}",
                position.block
            );
        }
    }
}

fn get_tape_handle(param: &Value) -> Result<(FileTapeHandle, String), Error> {
    let volume = if let Some(volume) = param["volume"].as_str() {
        volume.to_string()
    } else if let Ok(volume) = std::env::var("TAPE") {
        volume
    } else {
        bail!("no volume specified (use --volume or the TAPE environment variable)");
    };

    log::info!("using volume {}", volume);
    let mut handle = open_file_tape_drive(&FileTapeDrive::new(volume.clone()))?;

    let position = load_position(&volume)?;
    restore_position(&mut handle, &position);

    Ok((handle, volume))
}

#[api(
   input: {
        properties: {
            volume: {
                schema: VOLUME_PATH_SCHEMA,
                optional: true,
            },
            count: {
                schema: FILE_MARK_POSITION_SCHEMA,
            },
       },
    },
)]
/// Position the tape at the beginning of the count file (after
/// filemark count)
fn asf(count: usize, param: Value) -> Result<(), Error> {
    let (mut handle, volume) = get_tape_handle(&param)?;

    handle.rewind()?;
    handle.forward_space_files(count)?;

    store_position(&volume, &handle)
}

#[api(
   input: {
        properties: {
            volume: {
                schema: VOLUME_PATH_SCHEMA,
                optional: true,
            },
            count: {
                schema: FILE_MARK_COUNT_SCHEMA,
            },
       },
    },
)]
/// Backward space count files (position before file mark).
///
/// The tape is positioned on the last block of the previous file.
fn bsf(count: usize, param: Value) -> Result<(), Error> {
    let (mut handle, volume) = get_tape_handle(&param)?;

    handle.backward_space_files(count)?;

    store_position(&volume, &handle)
}

#[api(
   input: {
        properties: {
            volume: {
                schema: VOLUME_PATH_SCHEMA,
                optional: true,
            },
            count: {
                schema: RECORD_COUNT_SCHEMA,
            },
        },
    },
)]
/// Backward space records.
fn bsr(count: usize, param: Value) -> Result<(), Error> {
    let (mut handle, volume) = get_tape_handle(&param)?;

    handle.backward_space_records(count)?;

    store_position(&volume, &handle)
}

#[api(
   input: {
        properties: {
            volume: {
                schema: VOLUME_PATH_SCHEMA,
                optional: true,
            },
       },
    },
)]
/// Move to end of recorded media (for appending files).
fn eod(param: Value) -> Result<(), Error> {
    let (mut handle, volume) = get_tape_handle(&param)?;

    handle.move_to_eom()?;

    store_position(&volume, &handle)
}

#[api(
   input: {
        properties: {
            volume: {
                schema: VOLUME_PATH_SCHEMA,
                optional: true,
            },
        },
    },
)]
/// Erase media (truncate the volume to zero recorded data)
fn erase(param: Value) -> Result<(), Error> {
    let (mut handle, volume) = get_tape_handle(&param)?;

    handle.erase_media()?;

    store_position(&volume, &handle)
}

#[api(
   input: {
        properties: {
            volume: {
                schema: VOLUME_PATH_SCHEMA,
                optional: true,
            },
            count: {
                schema: FILE_MARK_COUNT_SCHEMA,
            },
       },
    },
)]
/// Forward space count files (position after file mark).
///
/// The tape is positioned on the first block of the next file.
fn fsf(count: usize, param: Value) -> Result<(), Error> {
    let (mut handle, volume) = get_tape_handle(&param)?;

    handle.forward_space_files(count)?;

    store_position(&volume, &handle)
}

#[api(
   input: {
        properties: {
            volume: {
                schema: VOLUME_PATH_SCHEMA,
                optional: true,
            },
            count: {
                schema: RECORD_COUNT_SCHEMA,
            },
        },
    },
)]
/// Forward space records.
fn fsr(count: usize, param: Value) -> Result<(), Error> {
    let (mut handle, volume) = get_tape_handle(&param)?;

    handle.forward_space_records(count)?;

    store_position(&volume, &handle)
}

#[api(
   input: {
        properties: {
            volume: {
                schema: VOLUME_PATH_SCHEMA,
                optional: true,
            },
       },
    },
)]
/// Rewind the tape and put the drive offline
fn offline(param: Value) -> Result<(), Error> {
    let (mut handle, volume) = get_tape_handle(&param)?;

    handle.rewind()?;
    handle.set_offline()?;

    drop_position(&volume);

    Ok(())
}

#[api(
   input: {
        properties: {
            volume: {
                schema: VOLUME_PATH_SCHEMA,
                optional: true,
            },
       },
    },
)]
/// Rewind the tape
fn rewind(param: Value) -> Result<(), Error> {
    let (mut handle, volume) = get_tape_handle(&param)?;

    handle.rewind()?;

    store_position(&volume, &handle)
}

#[api(
   input: {
        properties: {
            volume: {
                schema: VOLUME_PATH_SCHEMA,
                optional: true,
            },
       },
    },
)]
/// Read one block and write it to stdout.
///
/// Zero bytes of output means the head is at a filemark or at the end of
/// the recorded data - check 'status' to disambiguate.
fn rb(param: Value) -> Result<(), Error> {
    let (mut handle, volume) = get_tape_handle(&param)?;

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let count = handle.read_block(&mut buf)?;
    if count == 0 {
        log::info!("read 0 bytes (filemark or end of data)");
    } else {
        std::io::stdout().write_all(&buf[..count])?;
    }

    store_position(&volume, &handle)
}

#[api(
   input: {
        properties: {
            volume: {
                schema: VOLUME_PATH_SCHEMA,
                optional: true,
            },
            file: {
                description: "File whose contents become one tape block.",
                type: String,
            },
       },
    },
)]
/// Write the contents of a file as a single block at the current
/// position (recorded data behind the write point is lost).
fn wb(file: String, param: Value) -> Result<(), Error> {
    let (mut handle, volume) = get_tape_handle(&param)?;

    let data = std::fs::read(&file)?;
    let written = handle.write_block(&data)?;
    store_position(&volume, &handle)?;

    if written < data.len() {
        bail!(
            "short write ({} of {} bytes) - end of tape",
            written,
            data.len()
        );
    }

    Ok(())
}

#[api(
   input: {
        properties: {
            volume: {
                schema: VOLUME_PATH_SCHEMA,
                optional: true,
            },
            "output-format": {
                schema: OUTPUT_FORMAT,
                optional: true,
            },
        },
    },
)]
/// Drive Status
fn status(param: Value) -> Result<(), Error> {
    let output_format = get_output_format(&param);

    let (handle, _volume) = get_tape_handle(&param)?;

    let status = handle.status();

    if output_format == "json-pretty" {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    if output_format == "json" {
        println!("{}", serde_json::to_string(&status)?);
        return Ok(());
    }

    if output_format != "text" {
        bail!("unknown output format '{}'", output_format);
    }

    let mut flags = Vec::new();
    if status.at_bot {
        flags.push("BOT");
    }
    if status.at_eof {
        flags.push("EOF");
    }
    if status.at_eot {
        flags.push("EOT");
    }
    if status.at_eod {
        flags.push("EOD");
    }
    if status.online {
        flags.push("ONLINE");
    }

    println!(
        "file={} block={} {}",
        status.file_number,
        status.block_number,
        flags.join(" "),
    );

    Ok(())
}

#[api(
   input: {
        properties: {
            volume: {
                schema: VOLUME_PATH_SCHEMA,
                optional: true,
            },
            count: {
                schema: FILE_MARK_COUNT_SCHEMA,
                optional: true,
             },
        },
    },
)]
/// Write count (default 1) EOF marks at current position.
fn weof(count: Option<usize>, param: Value) -> Result<(), Error> {
    let count = count.unwrap_or(1);

    let (mut handle, volume) = get_tape_handle(&param)?;

    handle.write_filemarks(count)?;

    store_position(&volume, &handle)
}

fn main() {
    init_cli_logger("VTAPE_LOG", "info");

    let cmd_def = CliCommandMap::new()
        .usage_skip_options(&["volume", "output-format"])
        .insert("asf", CliCommand::new(&API_METHOD_ASF).arg_param(&["count"]))
        .insert("bsf", CliCommand::new(&API_METHOD_BSF).arg_param(&["count"]))
        .insert("bsr", CliCommand::new(&API_METHOD_BSR).arg_param(&["count"]))
        .insert("eod", CliCommand::new(&API_METHOD_EOD))
        .insert("erase", CliCommand::new(&API_METHOD_ERASE))
        .insert("fsf", CliCommand::new(&API_METHOD_FSF).arg_param(&["count"]))
        .insert("fsr", CliCommand::new(&API_METHOD_FSR).arg_param(&["count"]))
        .insert("offline", CliCommand::new(&API_METHOD_OFFLINE))
        .insert("rb", CliCommand::new(&API_METHOD_RB))
        .insert("rewind", CliCommand::new(&API_METHOD_REWIND))
        .insert("status", CliCommand::new(&API_METHOD_STATUS))
        .insert("wb", CliCommand::new(&API_METHOD_WB).arg_param(&["file"]))
        .insert("weof", CliCommand::new(&API_METHOD_WEOF).arg_param(&["count"]));

    let rpcenv = CliEnvironment::new();

    run_cli_command(cmd_def, rpcenv, None);
}
