use axerrno::ax_err;
use bit_field::BitField;
use hvvcpu::{EntryControls, GeneralRegisters, VmxExitInfo};
use x86::msr::IA32_EFER;

use super::{HandlerResult, VmExitEffect};
use crate::config::GuestConfig;

/// IA32_EFER.LME
const EFER_LME: usize = 8;

pub(super) fn handle_rdmsr(
    exit_info: &VmxExitInfo,
    regs: &GeneralRegisters,
    config: &GuestConfig,
) -> HandlerResult {
    let index = regs.rcx as u32;
    if index != IA32_EFER {
        warn!("VM exit: RDMSR of unsupported MSR {:#x}", index);
        return Ok(None);
    }
    let Some(entry) = config.msr(index) else {
        return ax_err!(BadState, "EFER is missing from the guest MSR shadow area");
    };

    let mut regs = *regs;
    regs.set_edx_eax(entry.value);
    trace!("VM exit: RDMSR({:#x}) -> {:#x}", index, entry.value);
    Ok(Some(VmExitEffect::advance(regs, exit_info)))
}

pub(super) fn handle_wrmsr(
    exit_info: &VmxExitInfo,
    regs: &GeneralRegisters,
    config: &mut GuestConfig,
) -> HandlerResult {
    let index = regs.rcx as u32;
    if index != IA32_EFER {
        warn!("VM exit: WRMSR of unsupported MSR {:#x}", index);
        return Ok(None);
    }
    let Some(entry) = config.msr_mut(index) else {
        return ax_err!(BadState, "EFER is missing from the guest MSR shadow area");
    };

    let value = regs.edx_eax();
    let mut effect = VmExitEffect::advance(*regs, exit_info);
    if !entry.value.get_bit(EFER_LME) && value.get_bit(EFER_LME) {
        debug!("VM exit: guest enables long mode");
        effect.entry_controls |= EntryControls::IA32E_MODE_GUEST;
    }
    trace!("VM exit: WRMSR({:#x}) {:#x} -> {:#x}", index, entry.value, value);
    entry.value = value;
    Ok(Some(effect))
}
