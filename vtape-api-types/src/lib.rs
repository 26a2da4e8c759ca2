//! Types for the vtape API
//!
//! Shared between the drive emulator and the `vmt` control binary.

use serde::{Deserialize, Serialize};

use proxmox_schema::{api, Schema, StringSchema};

pub const VOLUME_PATH_SCHEMA: Schema =
    StringSchema::new("Path to the backing volume file (i.e. '/tmp/vtape/tape0')").schema();

#[api(
    properties: {
        path: {
            schema: VOLUME_PATH_SCHEMA,
        },
    },
)]
#[derive(Serialize, Deserialize, Clone)]
#[serde(rename_all = "kebab-case")]
/// File backed tape drive (only for test and debug)
pub struct FileTapeDrive {
    pub path: String,
    /// Maximum volume size in bytes (unlimited if unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
}

impl FileTapeDrive {
    pub fn new<P: Into<String>>(path: P) -> Self {
        Self {
            path: path.into(),
            max_size: None,
        }
    }
}

#[api()]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
/// Tape positioning operation (MTIOCTOP subset)
pub enum TapeOpCode {
    /// Write count filemarks
    Weof,
    /// Forward space count files
    Fsf,
    /// Backward space count files
    Bsf,
    /// Forward space count records
    Fsr,
    /// Backward space count records
    Bsr,
    /// Rewind to beginning of tape
    Rewind,
    /// Rewind and put the drive offline
    Offline,
    /// No operation (sets status only)
    Nop,
    /// Erase the volume
    Erase,
    /// Space to end of recorded media
    Eom,
    /// Re-tension tape (no-op on a file backed volume)
    Retension,
}

impl TapeOpCode {
    /// The operation number used by the Linux st driver (mtio.h)
    pub fn mt_op(&self) -> u16 {
        match self {
            TapeOpCode::Weof => 0,
            TapeOpCode::Fsf => 1,
            TapeOpCode::Bsf => 2,
            TapeOpCode::Fsr => 3,
            TapeOpCode::Bsr => 4,
            TapeOpCode::Rewind => 5,
            TapeOpCode::Offline => 6,
            TapeOpCode::Nop => 7,
            TapeOpCode::Erase => 12,
            TapeOpCode::Eom => 13,
            TapeOpCode::Retension => 15,
        }
    }
}

impl TryFrom<u16> for TapeOpCode {
    type Error = u16;

    fn try_from(code: u16) -> Result<Self, u16> {
        Ok(match code {
            0 => TapeOpCode::Weof,
            1 => TapeOpCode::Fsf,
            2 => TapeOpCode::Bsf,
            3 => TapeOpCode::Fsr,
            4 => TapeOpCode::Bsr,
            5 => TapeOpCode::Rewind,
            6 => TapeOpCode::Offline,
            7 => TapeOpCode::Nop,
            12 => TapeOpCode::Erase,
            13 => TapeOpCode::Eom,
            15 => TapeOpCode::Retension,
            other => return Err(other),
        })
    }
}

#[api()]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
/// Drive and media status (MTIOCGET equivalent)
pub struct DriveStatus {
    /// Index of the current tape file (-1 when offline)
    pub file_number: i64,
    /// Index of the next block within the current file (-1 when indeterminate)
    pub block_number: i64,
    /// Positioned at beginning of tape
    pub at_bot: bool,
    /// Positioned just after a filemark
    pub at_eof: bool,
    /// End of physical media reached
    pub at_eot: bool,
    /// Positioned at end of recorded data
    pub at_eod: bool,
    /// Volume online
    pub online: bool,
    /// Status word with the generic (GMT) device status bits
    pub status_bits: u32,
    /// Density code reported to MTIOCGET
    pub density: u32,
    /// Block size reported to MTIOCGET
    pub block_size: u32,
}
