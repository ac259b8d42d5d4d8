use core::ops::Range;

use axerrno::ax_err;
use hvaddrspace::{
    ExtendedPageTable, HostPhysAddr, MappingFlags, MemoryAddr, PhysFrame, FULL_ACCESS,
};
use hvvcpu::{GeneralRegisters, NestedPageFaultInfo};

use super::{HandlerResult, VmExitEffect};
use crate::config::GuestConfig;
use crate::HvVmHal;

/// The VGA text buffer, passed through to the host's own.
const VGA_TEXT_BUFFER: Range<usize> = 0xB_8000..0xB_9000;

/// Backs the faulting page and restarts the faulting instruction.
pub(super) fn handle_ept_violation<H: HvVmHal>(
    fault: &NestedPageFaultInfo,
    regs: &GeneralRegisters,
    config: &GuestConfig,
    ept: &mut ExtendedPageTable<H::PagingHal>,
) -> HandlerResult {
    let gpa = fault.fault_guest_paddr;
    let page = gpa.align_down_4k();
    let is_vga = VGA_TEXT_BUFFER.contains(&gpa.as_usize());
    if !is_vga && !config.is_backed(gpa) {
        warn!("VM exit: EPT violation outside guest memory: {:#x?}", fault);
        return Ok(None);
    }

    if let Some(entry) = ept.leaf_entry(page).filter(|entry| entry.is_present()) {
        if entry.is_full_access() {
            debug!("VM exit: spurious EPT violation at {:?}", gpa);
            return Ok(Some(VmExitEffect::retry(*regs)));
        }
        warn!(
            "VM exit: {:?} access to restricted page {:?}",
            fault.access_flags, entry
        );
        return Ok(None);
    }

    let frame = if is_vga {
        match PhysFrame::<H::PagingHal>::share(HostPhysAddr::from(VGA_TEXT_BUFFER.start)) {
            Some(frame) => frame,
            None => return ax_err!(BadState, "VGA text buffer is not a tracked host frame"),
        }
    } else {
        PhysFrame::<H::PagingHal>::alloc_zero()?
    };
    let flags = if is_vga {
        FULL_ACCESS | MappingFlags::DEVICE
    } else {
        FULL_ACCESS
    };
    ept.insert(&frame, page, flags)?;
    trace!("VM exit: backed {:?} with {:#x}", page, frame.start_paddr());
    Ok(Some(VmExitEffect::retry(*regs)))
}
