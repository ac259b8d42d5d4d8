use alloc::vec::Vec;

use axerrno::{ax_err, AxResult};
use x86::msr::IA32_EFER;

use hvaddrspace::{GuestPhysAddr, PAGE_SIZE};

/// Start of the high backed RAM range, just past the legacy I/O hole.
pub const HIGH_MEMORY_START: usize = 0x10_0000;

/// One entry of the guest MSR shadow area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MsrEntry {
    pub index: u32,
    #[serde(default)]
    pub value: u64,
}

/// Per-guest configuration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GuestConfig {
    /// Total guest physical memory, in bytes.
    pub phys_sz: usize,
    /// Guest entry point.
    #[serde(default)]
    pub entry_point: usize,
    /// Back all guest RAM at creation instead of on first touch.
    #[serde(default)]
    pub populate: bool,
    /// The MSR shadow area.
    #[serde(default = "default_msrs")]
    pub msrs: Vec<MsrEntry>,
}

fn default_msrs() -> Vec<MsrEntry> {
    alloc::vec![MsrEntry {
        index: IA32_EFER,
        value: 0,
    }]
}

impl GuestConfig {
    /// A lazily populated guest of `phys_sz` bytes with a zeroed EFER shadow.
    pub fn new(phys_sz: usize) -> Self {
        Self {
            phys_sz,
            entry_point: 0,
            populate: false,
            msrs: default_msrs(),
        }
    }

    pub fn from_toml(raw_cfg_str: &str) -> AxResult<Self> {
        let config: Self = toml::from_str(raw_cfg_str).map_err(|err| {
            axerrno::ax_err_type!(
                InvalidInput,
                alloc::format!("toml deserialize get err {err:?}")
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Guest RAM must be page sized and extend past the legacy hole.
    pub fn validate(&self) -> AxResult {
        if self.phys_sz <= HIGH_MEMORY_START || self.phys_sz % PAGE_SIZE != 0 {
            return ax_err!(InvalidInput, "guest memory size must be page aligned and above 1M");
        }
        Ok(())
    }

    /// Whether `gpa` lies in backed guest RAM: [0, 0xA0000) or [1M, phys_sz).
    pub fn is_backed(&self, gpa: GuestPhysAddr) -> bool {
        const LOW_MEMORY_END: usize = 0xA_0000;
        let gpa = gpa.as_usize();
        gpa < LOW_MEMORY_END || (HIGH_MEMORY_START..self.phys_sz).contains(&gpa)
    }

    /// Memory above 1M in KiB, as reported by the CMOS. The 16-bit register
    /// saturates.
    pub fn extended_memory_kb(&self) -> u16 {
        (self.phys_sz / 1024)
            .saturating_sub(1024)
            .min(u16::MAX as usize) as u16
    }

    /// Linear scan of the MSR shadow area.
    pub fn msr_mut(&mut self, index: u32) -> Option<&mut MsrEntry> {
        self.msrs.iter_mut().find(|entry| entry.index == index)
    }

    pub fn msr(&self, index: u32) -> Option<&MsrEntry> {
        self.msrs.iter().find(|entry| entry.index == index)
    }
}
