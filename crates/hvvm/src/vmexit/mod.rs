//! The VM Exit Dispatcher.
//!
//! Every handler looks at the exit information and a copy of the guest
//! registers and returns `Ok(Some(effect))` when it serviced the exit,
//! `Ok(None)` when the guest must be terminated, or `Err(..)` when the host
//! itself is misconfigured. Handlers may update host-side guest state such as
//! the EPT, the MSR shadow area or device latches. The vCPU itself (registers,
//! `RIP`, entry controls) is only written by [`apply`].

mod cpuid;
mod ept_violation;
mod io;
mod msr;
pub mod vmcall;

use axerrno::AxResult;
use hvaddrspace::ExtendedPageTable;
use hvvcpu::{
    EntryControls, ExitSnapshot, GeneralRegisters, VmcsAccessor, VmxExitInfo, VmxExitReason,
};

use crate::config::GuestConfig;
use crate::device::CmosDevice;
use crate::ipc::{IpcTransport, ServiceResolver};
use crate::HvVmHal;

/// Changes to the guest requested by a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmExitEffect {
    /// The guest's general-purpose registers after the exit.
    pub regs: GeneralRegisters,
    /// Bytes to advance the guest `RIP` by.
    pub rip_delta: u64,
    /// VM-entry controls to set before the next entry.
    pub entry_controls: EntryControls,
}

impl VmExitEffect {
    /// Resume after the trapped instruction.
    pub fn advance(regs: GeneralRegisters, exit_info: &VmxExitInfo) -> Self {
        Self {
            regs,
            rip_delta: exit_info.exit_instruction_length as u64,
            entry_controls: EntryControls::empty(),
        }
    }

    /// Restart the trapped instruction.
    pub fn retry(regs: GeneralRegisters) -> Self {
        Self {
            regs,
            rip_delta: 0,
            entry_controls: EntryControls::empty(),
        }
    }
}

/// What the guest context needs to do after an exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmExitOutcome {
    /// The exit was handled, enter the guest again.
    Resume,
    /// The exit could not be handled, the guest is terminated.
    Terminate,
}

pub(crate) type HandlerResult = AxResult<Option<VmExitEffect>>;

/// The parts of a guest context the handlers may look at or change.
pub(crate) struct ExitContext<'a, H: HvVmHal> {
    pub ept: &'a mut ExtendedPageTable<H::PagingHal>,
    pub config: &'a mut GuestConfig,
    pub cmos: &'a mut CmosDevice,
    pub ipc: &'a mut dyn IpcTransport,
    pub resolver: &'a dyn ServiceResolver,
}

/// Routes the exit described by `exit_info` to its handler.
pub(crate) fn dispatch<H: HvVmHal>(
    ctx: ExitContext<'_, H>,
    vmcs: &dyn VmcsAccessor,
    exit_info: &VmxExitInfo,
    regs: &GeneralRegisters,
) -> HandlerResult {
    if exit_info.entry_failure {
        error!("VM entry failed: {:#x?}", exit_info);
        return Ok(None);
    }

    match exit_info.exit_reason {
        VmxExitReason::CPUID => Ok(Some(cpuid::handle_cpuid::<H>(exit_info, regs))),
        VmxExitReason::MSR_READ => msr::handle_rdmsr(exit_info, regs, ctx.config),
        VmxExitReason::MSR_WRITE => msr::handle_wrmsr(exit_info, regs, ctx.config),
        VmxExitReason::IO_INSTRUCTION => {
            io::handle_io(exit_info, &vmcs.io_exit_info()?, regs, ctx.cmos)
        }
        VmxExitReason::EPT_VIOLATION => ept_violation::handle_ept_violation::<H>(
            &vmcs.ept_violation_info()?,
            regs,
            ctx.config,
            ctx.ept,
        ),
        VmxExitReason::VMCALL => vmcall::handle_vmcall::<H>(exit_info, regs, ctx),
        reason => {
            warn!(
                "Unhandled VM exit {:?} at RIP {:#x}",
                reason, exit_info.guest_rip
            );
            Ok(None)
        }
    }
}

/// Writes `effect` back to the guest.
pub(crate) fn apply(
    vmcs: &mut dyn VmcsAccessor,
    snapshot: &mut ExitSnapshot,
    effect: &VmExitEffect,
) -> AxResult {
    snapshot.regs = effect.regs;
    if effect.rip_delta != 0 {
        snapshot.rip += effect.rip_delta;
        vmcs.set_guest_rip(snapshot.rip)?;
    }
    if !effect.entry_controls.is_empty() {
        vmcs.enable_entry_controls(effect.entry_controls)?;
    }
    Ok(())
}
