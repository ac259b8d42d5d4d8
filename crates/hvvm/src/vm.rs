use alloc::boxed::Box;
use core::fmt;

use axerrno::{ax_err, AxResult};
use hvaddrspace::{
    ExtendedPageTable, GuestPhysAddr, HostPhysAddr, HostVirtAddr, MappingFlags, MemoryAddr,
    PhysFrame, FULL_ACCESS,
};
use hvvcpu::{ExitSnapshot, VmcsAccessor};

use crate::config::{GuestConfig, HIGH_MEMORY_START};
use crate::device::CmosDevice;
use crate::ipc::{IpcTransport, ServiceResolver};
use crate::vmexit::{self, ExitContext, VmExitOutcome};
use crate::HvVmHal;

/// Lifecycle of a guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestState {
    Running,
    Terminated,
}

/// A guest: its memory, its devices and its channel to the host.
pub struct GuestVm<H: HvVmHal> {
    config: GuestConfig,
    ept: ExtendedPageTable<H::PagingHal>,
    // Released by drop, after the tree is emptied.
    ept_root: PhysFrame<H::PagingHal>,
    cmos: CmosDevice,
    ipc: Box<dyn IpcTransport>,
    resolver: Box<dyn ServiceResolver>,
    state: GuestState,
}

impl<H: HvVmHal> fmt::Debug for GuestVm<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestVm")
            .field("config", &self.config)
            .field("ept_root", &self.ept_root.start_paddr())
            .field("state", &self.state)
            .finish()
    }
}

impl<H: HvVmHal> GuestVm<H> {
    /// Creates a guest with an empty EPT. With [`GuestConfig::populate`] all
    /// guest RAM is backed right away.
    pub fn new(
        config: GuestConfig,
        ipc: Box<dyn IpcTransport>,
        resolver: Box<dyn ServiceResolver>,
    ) -> AxResult<Self> {
        config.validate()?;
        let ept_root = PhysFrame::alloc_zero()?;
        let ept = ExtendedPageTable::from_root(ept_root.start_paddr())?;
        let mut vm = Self {
            cmos: CmosDevice::new(config.extended_memory_kb()),
            config,
            ept,
            ept_root,
            ipc,
            resolver,
            state: GuestState::Running,
        };
        info!(
            "Guest created: {:#x} bytes of RAM, EPT root {:#x}",
            vm.config.phys_sz,
            vm.ept.root_paddr()
        );
        if vm.config.populate {
            vm.populate_static()?;
        }
        Ok(vm)
    }

    /// Backs [0, 0xA0000) and [1M, phys_sz) with fresh pages.
    pub fn populate_static(&mut self) -> AxResult {
        const LOW_MEMORY_END: usize = 0xA_0000;
        self.ept.populate(
            GuestPhysAddr::from(0)..GuestPhysAddr::from(LOW_MEMORY_END),
            FULL_ACCESS,
        )?;
        self.ept.populate(
            GuestPhysAddr::from(HIGH_MEMORY_START)..GuestPhysAddr::from(self.config.phys_sz),
            FULL_ACCESS,
        )
    }

    /// Maps a host page filled by the guest loader at `gpa`.
    ///
    /// The page must be an allocator-tracked frame, both addresses must be
    /// page aligned, `gpa` must lie below the guest's memory size and the
    /// guest must at least be able to read it. The guest takes its own
    /// reference on the page.
    pub fn map_from_host(
        &mut self,
        host_paddr: HostPhysAddr,
        gpa: GuestPhysAddr,
        flags: MappingFlags,
    ) -> AxResult {
        if gpa.as_usize() >= self.config.phys_sz {
            return ax_err!(InvalidInput, "guest physical address beyond guest memory");
        }
        if !gpa.is_aligned_4k() {
            return ax_err!(InvalidInput, "guest physical address is not page aligned");
        }
        if !flags.contains(MappingFlags::READ) {
            return ax_err!(InvalidInput, "guest mapping must be readable");
        }
        let Some(frame) = PhysFrame::<H::PagingHal>::share(host_paddr) else {
            return ax_err!(InvalidInput, "host address is not an allocator-tracked frame");
        };
        self.ept.insert(&frame, gpa, flags)
    }

    /// Prepares `vmcs` for the first entry of this guest: installs the EPT
    /// and starts the guest at [`GuestConfig::entry_point`].
    pub fn setup_vmcs(&self, vmcs: &mut dyn VmcsAccessor) -> AxResult {
        vmcs.set_ept_pointer(self.eptp())?;
        vmcs.set_guest_rip(self.config.entry_point as u64)?;
        debug!(
            "VMCS set up: EPTP {:#x}, entry point {:#x}",
            self.eptp(),
            self.config.entry_point
        );
        Ok(())
    }

    /// Services one VM exit.
    ///
    /// A handled exit updates `snapshot` and the VMCS; an unhandled one
    /// terminates the guest. A host-side error terminates the guest as well
    /// and is returned.
    pub fn handle_vm_exit(
        &mut self,
        vmcs: &mut dyn VmcsAccessor,
        snapshot: &mut ExitSnapshot,
    ) -> AxResult<VmExitOutcome> {
        if self.state == GuestState::Terminated {
            return ax_err!(BadState, "guest is terminated");
        }

        let exit_info = match vmcs.exit_info() {
            Ok(exit_info) => exit_info,
            Err(err) => {
                error!("Failed to decode VM exit: {:?}", err);
                self.state = GuestState::Terminated;
                return Err(err);
            }
        };
        let ctx = ExitContext::<H> {
            ept: &mut self.ept,
            config: &mut self.config,
            cmos: &mut self.cmos,
            ipc: self.ipc.as_mut(),
            resolver: self.resolver.as_ref(),
        };
        let result = vmexit::dispatch(ctx, vmcs, &exit_info, &snapshot.regs)
            .and_then(|effect| match effect {
                Some(effect) => vmexit::apply(vmcs, snapshot, &effect).map(|_| VmExitOutcome::Resume),
                None => Ok(VmExitOutcome::Terminate),
            });

        match result {
            Ok(VmExitOutcome::Resume) => {}
            Ok(VmExitOutcome::Terminate) => {
                error!(
                    "Guest terminated on {:?} at RIP {:#x}: {:#x?}",
                    exit_info.exit_reason, exit_info.guest_rip, snapshot.regs
                );
                self.state = GuestState::Terminated;
            }
            Err(err) => {
                error!(
                    "Failed to handle {:?} at RIP {:#x}: {:?}",
                    exit_info.exit_reason, exit_info.guest_rip, err
                );
                self.state = GuestState::Terminated;
            }
        }
        result
    }

    pub fn state(&self) -> GuestState {
        self.state
    }

    pub fn config(&self) -> &GuestConfig {
        &self.config
    }

    pub fn ept(&self) -> &ExtendedPageTable<H::PagingHal> {
        &self.ept
    }

    /// The EPT pointer to install in this guest's VMCS.
    pub fn eptp(&self) -> u64 {
        self.ept.eptp()
    }

    /// Host virtual address of guest memory at `gpa`, if it is backed.
    pub fn resolve_host_address(&self, gpa: GuestPhysAddr) -> Option<HostVirtAddr> {
        self.ept.resolve_host_address(gpa)
    }

    /// Current value of the CMOS index latch.
    pub fn cmos_index(&self) -> u8 {
        self.cmos.index()
    }
}

impl<H: HvVmHal> Drop for GuestVm<H> {
    fn drop(&mut self) {
        debug!("Guest dropped, releasing EPT at {:#x}", self.ept.root_paddr());
        self.ept.free_all();
    }
}
