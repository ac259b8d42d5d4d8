//! Port I/O devices emulated for the guest.

mod cmos;

use axerrno::AxResult;
use hvvcpu::AccessWidth;

pub use cmos::CmosDevice;

/// A device reached through the I/O port space.
///
/// A port/direction combination the device does not implement is reported as
/// [`AxError::Unsupported`](axerrno::AxError::Unsupported).
pub trait PortIoDevice {
    fn port_range(&self) -> core::ops::Range<u16>;
    fn read(&self, port: u16, width: AccessWidth) -> AxResult<u32>;
    fn write(&mut self, port: u16, width: AccessWidth, value: u32) -> AxResult;
}
