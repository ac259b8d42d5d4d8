//! The trap-handling core of a thin VMX hypervisor.
//!
//! This crate contains:
//! - [`GuestVm`]: a guest's memory, emulated devices and host channel, and
//!   the entry point for its VM exits.
//! - [`vmexit`]: the VM Exit Dispatcher and the Hypercall Bridge.
//! - [`GuestConfig`]: guest memory size and MSR shadow area, loadable from TOML.

#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use]
extern crate log;

mod config;
mod device;
mod hal;
mod ipc;
mod vm;

pub mod vmexit;

pub use config::{GuestConfig, MsrEntry, HIGH_MEMORY_START};
pub use device::{CmosDevice, PortIoDevice};
pub use hal::{host_cpuid, HvVmHal};
pub use ipc::{IpcMessage, IpcTransport, ProcessId, ServiceResolver, ServiceType, HOST_FS_ENV};
pub use vm::{GuestState, GuestVm};
pub use vmexit::{VmExitEffect, VmExitOutcome};
