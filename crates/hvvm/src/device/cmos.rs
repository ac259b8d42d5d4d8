//! Minimal CMOS/RTC: just enough NVRAM for a guest to size its memory.
//! (ref: https://wiki.osdev.org/CMOS)

use axerrno::{AxError, AxResult};
use hvvcpu::AccessWidth;

use super::PortIoDevice;

/// Index register, write only.
pub const CMOS_INDEX_PORT: u16 = 0x70;
/// Data register for the latched index, read only.
pub const CMOS_DATA_PORT: u16 = 0x71;

const NVRAM_BASELO: u8 = 0x15; // low byte; RTC off. base memory size (KiB)
const NVRAM_BASEHI: u8 = 0x16;
const NVRAM_EXTLO: u8 = 0x17; // low byte; RTC off. extended memory size (KiB)
const NVRAM_EXTHI: u8 = 0x18;

const BASE_MEMORY_KB: u16 = 640;

pub struct CmosDevice {
    index: u8,
    extended_memory_kb: u16,
}

impl CmosDevice {
    pub const fn new(extended_memory_kb: u16) -> Self {
        Self {
            index: 0,
            extended_memory_kb,
        }
    }

    /// The currently latched register index.
    pub fn index(&self) -> u8 {
        self.index
    }
}

impl PortIoDevice for CmosDevice {
    fn port_range(&self) -> core::ops::Range<u16> {
        CMOS_INDEX_PORT..CMOS_DATA_PORT + 1
    }

    fn read(&self, port: u16, _width: AccessWidth) -> AxResult<u32> {
        if port != CMOS_DATA_PORT {
            return Err(AxError::Unsupported);
        }
        let [base_lo, base_hi] = BASE_MEMORY_KB.to_le_bytes();
        let [ext_lo, ext_hi] = self.extended_memory_kb.to_le_bytes();
        let value = match self.index {
            NVRAM_BASELO => base_lo,
            NVRAM_BASEHI => base_hi,
            NVRAM_EXTLO => ext_lo,
            NVRAM_EXTHI => ext_hi,
            index => {
                debug!("CMOS: read of unsupported register {:#x}", index);
                return Err(AxError::Unsupported);
            }
        };
        Ok(value as u32)
    }

    fn write(&mut self, port: u16, _width: AccessWidth, value: u32) -> AxResult {
        if port != CMOS_INDEX_PORT {
            return Err(AxError::Unsupported);
        }
        self.index = value as u8;
        Ok(())
    }
}
