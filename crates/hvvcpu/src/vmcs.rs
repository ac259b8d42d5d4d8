use axerrno::{ax_err_type, AxResult};
use bit_field::BitField;
use x86::vmx::vmcs::control::{self, EntryControls};
use x86::vmx::vmcs::{guest, ro};

use hvaddrspace::{GuestPhysAddr, MappingFlags};

use crate::{AccessWidth, VmxExitReason};

/// Basic information about a VM exit. (SDM Vol. 3C, Section 28.2.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmxExitInfo {
    /// VM-entry failure. (0 = true VM exit; 1 = VM-entry failure)
    pub entry_failure: bool,
    /// Basic exit reason.
    pub exit_reason: VmxExitReason,
    /// For VM exits resulting from instruction execution, this field receives
    /// the length in bytes of the instruction whose execution led to the VM exit.
    pub exit_instruction_length: u32,
    /// Guest `RIP` where the VM exit occurs.
    pub guest_rip: u64,
}

/// Exit qualification for I/O instructions. (SDM Vol. 3C, Section 28.2.1, Table 28-5)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmxIoExitInfo {
    /// Size of access.
    pub access_size: AccessWidth,
    /// Direction of the attempted access (0 = OUT, 1 = IN).
    pub is_in: bool,
    /// String instruction (0 = not string; 1 = string).
    pub is_string: bool,
    /// REP prefixed (0 = not REP; 1 = REP).
    pub is_repeat: bool,
    /// Port number. (as specified in DX or in an immediate operand)
    pub port: u16,
}

impl VmxIoExitInfo {
    /// Decodes the exit qualification of an I/O instruction exit.
    pub fn from_qualification(qualification: u64) -> Self {
        let access_size = match qualification.get_bits(0..3) {
            0 => AccessWidth::Byte,
            1 => AccessWidth::Word,
            _ => AccessWidth::Dword,
        };
        Self {
            access_size,
            is_in: qualification.get_bit(3),
            is_string: qualification.get_bit(4),
            is_repeat: qualification.get_bit(5),
            port: qualification.get_bits(16..32) as u16,
        }
    }
}

/// Information about an EPT violation. (SDM Vol. 3C, Section 28.2.1, Table 28-7)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NestedPageFaultInfo {
    /// Access type that caused the fault.
    pub access_flags: MappingFlags,
    /// Guest physical address that caused the fault.
    pub fault_guest_paddr: GuestPhysAddr,
}

impl NestedPageFaultInfo {
    pub fn new(qualification: u64, fault_guest_paddr: GuestPhysAddr) -> Self {
        let mut access_flags = MappingFlags::empty();
        if qualification.get_bit(0) {
            access_flags |= MappingFlags::READ;
        }
        if qualification.get_bit(1) {
            access_flags |= MappingFlags::WRITE;
        }
        if qualification.get_bit(2) {
            access_flags |= MappingFlags::EXECUTE;
        }
        Self {
            access_flags,
            fault_guest_paddr,
        }
    }
}

/// Access to the fields of the current VMCS, addressed by their encodings.
///
/// Only [`read`](Self::read) and [`write`](Self::write) touch the hardware;
/// the provided methods decode the exit-information fields on top of them.
pub trait VmcsAccessor {
    /// Reads the field with encoding `field`, zero-extended to 64 bits.
    fn read(&self, field: u32) -> AxResult<u64>;

    /// Writes the field with encoding `field`.
    fn write(&mut self, field: u32, value: u64) -> AxResult;

    /// Basic information about the last VM exit.
    fn exit_info(&self) -> AxResult<VmxExitInfo> {
        let full_reason = self.read(ro::EXIT_REASON)? as u32;
        let exit_reason = VmxExitReason::try_from(full_reason.get_bits(0..16)).map_err(|raw| {
            ax_err_type!(BadState, format_args!("unknown VM-exit reason {:#x}", raw))
        })?;
        let info = VmxExitInfo {
            entry_failure: full_reason.get_bit(31),
            exit_reason,
            exit_instruction_length: self.exit_instruction_length()?,
            guest_rip: self.read(guest::RIP)?,
        };
        trace!("VM exit: {:#x?}", info);
        Ok(info)
    }

    fn exit_qualification(&self) -> AxResult<u64> {
        self.read(ro::EXIT_QUALIFICATION)
    }

    /// Length in bytes of the instruction that caused the last VM exit.
    fn exit_instruction_length(&self) -> AxResult<u32> {
        Ok(self.read(ro::VMEXIT_INSTRUCTION_LEN)? as u32)
    }

    /// Information for VM exits due to I/O instructions.
    fn io_exit_info(&self) -> AxResult<VmxIoExitInfo> {
        Ok(VmxIoExitInfo::from_qualification(self.exit_qualification()?))
    }

    /// Information for VM exits due to EPT violations.
    fn ept_violation_info(&self) -> AxResult<NestedPageFaultInfo> {
        let fault_guest_paddr = self.read(ro::GUEST_PHYSICAL_ADDR_FULL)? as usize;
        Ok(NestedPageFaultInfo::new(
            self.exit_qualification()?,
            GuestPhysAddr::from(fault_guest_paddr),
        ))
    }

    fn set_guest_rip(&mut self, rip: u64) -> AxResult {
        self.write(guest::RIP, rip)
    }

    /// VM-entry controls. (SDM Vol. 3C, Section 25.8.1)
    fn entry_controls(&self) -> AxResult<EntryControls> {
        Ok(EntryControls::from_bits_truncate(
            self.read(control::VMENTRY_CONTROLS)? as u32,
        ))
    }

    /// Sets `controls` in the VM-entry controls, keeping every other bit
    /// (including the reserved default-1 ones) as it is.
    fn enable_entry_controls(&mut self, controls: EntryControls) -> AxResult {
        let raw = self.read(control::VMENTRY_CONTROLS)?;
        self.write(control::VMENTRY_CONTROLS, raw | controls.bits() as u64)
    }

    /// Installs the EPT pointer. (SDM Vol. 3C, Section 25.6.11)
    fn set_ept_pointer(&mut self, eptp: u64) -> AxResult {
        self.write(control::EPTP_FULL, eptp)
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        use x86::bits64::vmx;
        use x86::vmx::VmFail;

        use crate::definitions::VmxInstructionError;

        /// The VMCS loaded on the current processor, accessed with `vmread`/`vmwrite`.
        #[derive(Debug, Default)]
        pub struct CurrentVmcs;

        impl VmcsAccessor for CurrentVmcs {
            fn read(&self, field: u32) -> AxResult<u64> {
                unsafe { vmx::vmread(field) }.map_err(as_axerr)
            }

            fn write(&mut self, field: u32, value: u64) -> AxResult {
                unsafe { vmx::vmwrite(field, value) }.map_err(as_axerr)
            }
        }

        /// Converts a failed VMX instruction to an [`axerrno::AxError`].
        pub fn as_axerr(err: VmFail) -> axerrno::AxError {
            match err {
                VmFail::VmFailValid => {
                    let code = unsafe { vmx::vmread(ro::VM_INSTRUCTION_ERROR) }.unwrap_or(0) as u32;
                    ax_err_type!(BadState, VmxInstructionError::from(code).as_str())
                }
                VmFail::VmFailInvalid => ax_err_type!(BadState, "VMCS pointer is not valid"),
            }
        }
    }
}
