//! Guest CPU state and VM-exit information for VMX guests.
//!
//! The VMCS itself is reached through [`VmcsAccessor`]; the hardware
//! implementation is [`CurrentVmcs`] on x86_64 hosts.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;

mod definitions;
mod exit;
mod regs;
mod test;
mod vmcs;

pub use definitions::{VmxExitReason, VmxInstructionError};
pub use exit::{AccessWidth, ExitSnapshot};
pub use regs::GeneralRegisters;
pub use vmcs::{NestedPageFaultInfo, VmcsAccessor, VmxExitInfo, VmxIoExitInfo};

#[cfg(target_arch = "x86_64")]
pub use vmcs::{as_axerr, CurrentVmcs};

pub use x86::vmx::vmcs::control::EntryControls;
