use axerrno::AxError;
use hvvcpu::{AccessWidth, GeneralRegisters, VmxExitInfo, VmxIoExitInfo};

use super::{HandlerResult, VmExitEffect};
use crate::device::{CmosDevice, PortIoDevice};

/// Port I/O to the emulated CMOS. Everything else terminates the guest.
pub(super) fn handle_io(
    exit_info: &VmxExitInfo,
    io_info: &VmxIoExitInfo,
    regs: &GeneralRegisters,
    cmos: &mut CmosDevice,
) -> HandlerResult {
    if io_info.is_string || !cmos.port_range().contains(&io_info.port) {
        warn!("VM exit: unsupported port I/O {:#x?}", io_info);
        return Ok(None);
    }

    let width = io_info.access_size;
    let mut regs = *regs;
    let result = if io_info.is_in {
        cmos.read(io_info.port, width).map(|value| {
            regs.rax = merge_in(regs.rax, value, width);
        })
    } else {
        cmos.write(io_info.port, width, (regs.rax & width.mask()) as u32)
    };

    match result {
        Ok(()) => Ok(Some(VmExitEffect::advance(regs, exit_info))),
        Err(AxError::Unsupported) => {
            warn!(
                "VM exit: unsupported port I/O {:#x?}, CMOS index {:#x}",
                io_info,
                cmos.index()
            );
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Places an IN result in AL, AX or EAX. A 32-bit result clears the upper
/// half of RAX like any other 32-bit register write.
fn merge_in(rax: u64, value: u32, width: AccessWidth) -> u64 {
    match width {
        AccessWidth::Dword | AccessWidth::Qword => value as u64,
        _ => (rax & !width.mask()) | (value as u64 & width.mask()),
    }
}
