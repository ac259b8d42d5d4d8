/// General-purpose registers of the guest, in the order the VM-exit
/// trampoline saves them.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GeneralRegisters {
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rbx: u64,
    /// RSP lives in the VMCS guest-state area.
    _unused_rsp: u64,
    pub rbp: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

impl GeneralRegisters {
    /// EDX:EAX, as consumed by WRMSR.
    pub fn edx_eax(&self) -> u64 {
        (self.rdx & 0xffff_ffff) << 32 | (self.rax & 0xffff_ffff)
    }

    /// Splits `value` into EDX:EAX, as produced by RDMSR. Upper halves are cleared.
    pub fn set_edx_eax(&mut self, value: u64) {
        self.rax = value & 0xffff_ffff;
        self.rdx = value >> 32;
    }
}
