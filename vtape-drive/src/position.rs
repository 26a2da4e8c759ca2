use bitflags::bitflags;

bitflags! {
    /// Generic (GMT) device status bits, values as reported by the Linux
    /// st driver in `mtget.mt_gstat`
    pub struct StatusFlags: u32 {
        const EOF = 0x8000_0000;
        const BOT = 0x4000_0000;
        const EOT = 0x2000_0000;
        const EOD = 0x0800_0000;
        const WR_PROT = 0x0400_0000;
        const ONLINE = 0x0100_0000;
        const DR_OPEN = 0x0004_0000;
        const IM_REP_EN = 0x0001_0000;
    }
}

/// Where the virtual tape head currently is
///
/// Owned exclusively by one tape handle and mutated only by the engine.
/// `current_block == -1` means the block number is indeterminate, e.g.
/// after a failed positioning operation - real drives behave the same.
#[derive(Debug, Clone, Copy)]
pub struct PositionState {
    /// Index of the tape file the head is positioned at
    pub current_file: i32,
    /// Index of the next block to read/write within `current_file`
    pub current_block: i32,
    /// Highest file index open for appending
    pub last_file: i32,
    pub at_bot: bool,
    pub at_eof: bool,
    pub at_eot: bool,
    pub at_eod: bool,
    /// Set after a write: the current file still needs its terminating
    /// filemark (written by weof, close or offline)
    pub needs_filemark: bool,
}

impl PositionState {
    /// State right after loading a volume
    pub fn new() -> Self {
        Self {
            current_file: 0,
            current_block: 0,
            last_file: 0,
            at_bot: true,
            at_eof: false,
            at_eot: false,
            at_eod: false,
            needs_filemark: false,
        }
    }

    pub fn reset_to_bot(&mut self) {
        self.current_file = 0;
        self.current_block = 0;
        self.at_bot = true;
        self.at_eof = false;
        self.at_eot = false;
        self.at_eod = false;
    }

    /// Assemble the MTIOCGET status word
    pub fn status_flags(&self, online: bool) -> StatusFlags {
        let mut flags = StatusFlags::IM_REP_EN;
        if self.at_eof {
            flags |= StatusFlags::EOF;
        }
        if self.at_bot {
            flags |= StatusFlags::BOT;
        }
        if self.at_eot {
            flags |= StatusFlags::EOT;
        }
        if self.at_eod {
            flags |= StatusFlags::EOD;
        }
        if online {
            flags |= StatusFlags::ONLINE;
        } else {
            flags |= StatusFlags::DR_OPEN;
        }
        flags
    }
}

impl Default for PositionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_word_matches_driver_bits() {
        let mut pos = PositionState::new();
        assert_eq!(
            pos.status_flags(true),
            StatusFlags::BOT | StatusFlags::ONLINE | StatusFlags::IM_REP_EN
        );

        pos.at_bot = false;
        pos.at_eod = true;
        let flags = pos.status_flags(false);
        assert!(flags.contains(StatusFlags::EOD | StatusFlags::DR_OPEN));
        assert!(!flags.contains(StatusFlags::ONLINE));
    }
}
