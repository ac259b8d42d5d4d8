use hvaddrspace::PagingHal;
use raw_cpuid::CpuIdResult;

/// The interfaces which the host kernel must implement.
pub trait HvVmHal: Sized {
    /// The host's reference-counted physical page allocator.
    type PagingHal: PagingHal;

    /// Executes CPUID on the host processor.
    fn cpuid(leaf: u32, subleaf: u32) -> CpuIdResult {
        host_cpuid(leaf, subleaf)
    }
}

/// The real CPUID instruction, or all zeroes where there is none.
pub fn host_cpuid(leaf: u32, subleaf: u32) -> CpuIdResult {
    cfg_if::cfg_if! {
        if #[cfg(any(target_arch = "x86", target_arch = "x86_64"))] {
            raw_cpuid::cpuid!(leaf, subleaf)
        } else {
            let _ = (leaf, subleaf);
            CpuIdResult { eax: 0, ebx: 0, ecx: 0, edx: 0 }
        }
    }
}
