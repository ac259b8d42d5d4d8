#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use axerrno::{AxError, AxResult};
    use hvaddrspace::{GuestPhysAddr, MappingFlags};
    use x86::vmx::vmcs::{control, guest, ro};

    use crate::{
        AccessWidth, EntryControls, GeneralRegisters, VmcsAccessor, VmxExitReason, VmxIoExitInfo,
    };

    #[derive(Default)]
    struct MockVmcs {
        fields: BTreeMap<u32, u64>,
    }

    impl MockVmcs {
        fn with(fields: &[(u32, u64)]) -> Self {
            Self {
                fields: fields.iter().copied().collect(),
            }
        }
    }

    impl VmcsAccessor for MockVmcs {
        fn read(&self, field: u32) -> AxResult<u64> {
            self.fields.get(&field).copied().ok_or(AxError::NotFound)
        }

        fn write(&mut self, field: u32, value: u64) -> AxResult {
            self.fields.insert(field, value);
            Ok(())
        }
    }

    #[test]
    fn test_exit_info() {
        let vmcs = MockVmcs::with(&[
            (ro::EXIT_REASON, 10),
            (ro::VMEXIT_INSTRUCTION_LEN, 2),
            (guest::RIP, 0x7c00),
        ]);
        let info = vmcs.exit_info().unwrap();
        assert_eq!(info.exit_reason, VmxExitReason::CPUID);
        assert!(!info.entry_failure);
        assert_eq!(info.exit_instruction_length, 2);
        assert_eq!(info.guest_rip, 0x7c00);
    }

    #[test]
    fn test_entry_failure_exit() {
        let vmcs = MockVmcs::with(&[
            (ro::EXIT_REASON, (1 << 31) | 33),
            (ro::VMEXIT_INSTRUCTION_LEN, 0),
            (guest::RIP, 0),
        ]);
        let info = vmcs.exit_info().unwrap();
        assert!(info.entry_failure);
        assert_eq!(info.exit_reason, VmxExitReason::INVALID_GUEST_STATE);
    }

    #[test]
    fn test_unknown_exit_reason() {
        let vmcs = MockVmcs::with(&[
            (ro::EXIT_REASON, 35),
            (ro::VMEXIT_INSTRUCTION_LEN, 0),
            (guest::RIP, 0),
        ]);
        assert_eq!(vmcs.exit_info().err(), Some(AxError::BadState));
    }

    #[test]
    fn test_io_qualification() {
        // `out 0x70, al`
        let out = VmxIoExitInfo::from_qualification(0x70 << 16);
        assert_eq!(out.port, 0x70);
        assert!(!out.is_in);
        assert_eq!(out.access_size, AccessWidth::Byte);

        // `in eax, dx` with dx = 0x71
        let inl = VmxIoExitInfo::from_qualification((0x71 << 16) | (1 << 3) | 3);
        assert_eq!(inl.port, 0x71);
        assert!(inl.is_in);
        assert!(!inl.is_string);
        assert_eq!(inl.access_size, AccessWidth::Dword);

        // `rep insw`
        let rep = VmxIoExitInfo::from_qualification((0x1f0 << 16) | (1 << 5) | (1 << 4) | (1 << 3) | 1);
        assert_eq!(rep.access_size, AccessWidth::Word);
        assert!(rep.is_string && rep.is_repeat);
    }

    #[test]
    fn test_ept_violation_info() {
        let vmcs = MockVmcs::with(&[
            (ro::EXIT_QUALIFICATION, 0b110),
            (ro::GUEST_PHYSICAL_ADDR_FULL, 0x1234),
        ]);
        let info = vmcs.ept_violation_info().unwrap();
        assert_eq!(info.fault_guest_paddr, GuestPhysAddr::from(0x1234));
        assert_eq!(info.access_flags, MappingFlags::WRITE | MappingFlags::EXECUTE);
    }

    #[test]
    fn test_entry_controls() {
        let mut vmcs = MockVmcs::with(&[(control::VMENTRY_CONTROLS, 0x11ff)]);
        let controls = vmcs.entry_controls().unwrap();
        assert!(!controls.contains(EntryControls::IA32E_MODE_GUEST));

        vmcs.enable_entry_controls(EntryControls::IA32E_MODE_GUEST)
            .unwrap();
        assert_eq!(vmcs.read(control::VMENTRY_CONTROLS).unwrap(), 0x13ff);
    }

    #[test]
    fn test_edx_eax() {
        let mut regs = GeneralRegisters::default();
        regs.rax = 0xdead_beef_0000_0d01;
        regs.rdx = 0xffff_ffff_0000_0001;
        assert_eq!(regs.edx_eax(), 0x1_0000_0d01);

        regs.set_edx_eax(0x1234_5678_9abc_def0);
        assert_eq!(regs.rax, 0x9abc_def0);
        assert_eq!(regs.rdx, 0x1234_5678);
    }
}
