use bit_field::BitField;
use hvvcpu::{GeneralRegisters, VmxExitInfo};

use super::VmExitEffect;
use crate::HvVmHal;

const LEAF_FEATURE_INFO: u32 = 0x1;
/// CPUID.1:ECX.VMX
const FEATURE_VMX: usize = 5;

/// Runs the real CPUID and hides VMX from the guest. Always handled.
pub(super) fn handle_cpuid<H: HvVmHal>(
    exit_info: &VmxExitInfo,
    regs: &GeneralRegisters,
) -> VmExitEffect {
    let leaf = regs.rax as u32;
    let subleaf = regs.rcx as u32;
    let mut res = H::cpuid(leaf, subleaf);
    if leaf == LEAF_FEATURE_INFO {
        res.ecx.set_bit(FEATURE_VMX, false);
    }
    trace!("VM exit: CPUID({:#x}, {:#x}): {:?}", leaf, subleaf, res);

    let mut regs = *regs;
    regs.rax = res.eax as u64;
    regs.rbx = res.ebx as u64;
    regs.rcx = res.ecx as u64;
    regs.rdx = res.edx as u64;
    VmExitEffect::advance(regs, exit_info)
}
