use core::{convert::TryFrom, fmt};

use bit_field::BitField;
use page_table_entry::MappingFlags;

use crate::HostPhysAddr;

bitflags::bitflags! {
    /// The low bits of an EPT entry that this tree uses. (SDM Vol. 3C, Section 29.3.2)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct EPTFlags: u64 {
        const READ =            1 << 0;
        const WRITE =           1 << 1;
        const EXECUTE =         1 << 2;
        /// Memory type of a leaf, see [`EPTMemType`].
        const MEM_TYPE_MASK =   0b111 << 3;
        /// Leaf memory type overrides the guest PAT.
        const IGNORE_PAT =      1 << 6;
    }
}

numeric_enum_macro::numeric_enum! {
    #[repr(u8)]
    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    /// Memory type of a leaf mapping. (SDM Vol. 3C, Section 29.3.7)
    pub enum EPTMemType {
        Uncached = 0,
        WriteCombining = 1,
        WriteThrough = 4,
        WriteProtected = 5,
        WriteBack = 6,
    }
}

/// Guest access permissions and the EPT bits granting them.
const ACCESS_BITS: [(MappingFlags, EPTFlags); 3] = [
    (MappingFlags::READ, EPTFlags::READ),
    (MappingFlags::WRITE, EPTFlags::WRITE),
    (MappingFlags::EXECUTE, EPTFlags::EXECUTE),
];

impl EPTFlags {
    const FULL: Self = Self::READ.union(Self::WRITE).union(Self::EXECUTE);

    fn with_mem_type(self, mem_type: EPTMemType) -> Self {
        let mut bits = self.bits();
        bits.set_bits(3..6, mem_type as u64);
        Self::from_bits_truncate(bits)
    }

    fn mem_type(&self) -> Result<EPTMemType, u8> {
        EPTMemType::try_from(self.bits().get_bits(3..6) as u8)
    }
}

impl From<MappingFlags> for EPTFlags {
    /// Device mappings are uncached, everything else is write-back RAM.
    fn from(f: MappingFlags) -> Self {
        if f.is_empty() {
            return Self::empty();
        }
        let access = ACCESS_BITS
            .iter()
            .filter(|(mapping, _)| f.contains(*mapping))
            .fold(Self::empty(), |acc, (_, ept)| acc | *ept);
        let mem_type = if f.contains(MappingFlags::DEVICE) {
            EPTMemType::Uncached
        } else {
            EPTMemType::WriteBack
        };
        access.with_mem_type(mem_type)
    }
}

impl From<EPTFlags> for MappingFlags {
    fn from(f: EPTFlags) -> Self {
        let access = ACCESS_BITS
            .iter()
            .filter(|(_, ept)| f.contains(*ept))
            .fold(Self::empty(), |acc, (mapping, _)| acc | *mapping);
        match f.mem_type() {
            Ok(EPTMemType::Uncached) => access | Self::DEVICE,
            _ => access,
        }
    }
}

/// An x86_64 VMX extended page table entry.
///
/// Bits 12..52 hold the page-aligned physical address of the next-level table
/// or of the mapped frame, the low 12 bits hold [`EPTFlags`].
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct EPTEntry(u64);

impl EPTEntry {
    const PHYS_ADDR_MASK: u64 = 0x000f_ffff_ffff_f000; // bits 12..52

    /// An entry that maps nothing.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// A leaf entry mapping the 4K frame at `paddr`.
    ///
    /// The entry is always readable, so it counts as present, and ignores the
    /// guest PAT in favour of the memory type derived from `flags`.
    pub fn new_page(paddr: HostPhysAddr, flags: MappingFlags) -> Self {
        let flags = EPTFlags::from(flags | MappingFlags::READ) | EPTFlags::IGNORE_PAT;
        Self(flags.bits() | (paddr.as_usize() as u64 & Self::PHYS_ADDR_MASK))
    }

    /// An interior entry pointing at the table at `paddr`, with full access.
    pub fn new_table(paddr: HostPhysAddr) -> Self {
        Self(EPTFlags::FULL.bits() | (paddr.as_usize() as u64 & Self::PHYS_ADDR_MASK))
    }

    /// The raw 64-bit value.
    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub fn paddr(&self) -> HostPhysAddr {
        HostPhysAddr::from((self.0 & Self::PHYS_ADDR_MASK) as usize)
    }

    pub fn flags(&self) -> MappingFlags {
        EPTFlags::from_bits_truncate(self.0).into()
    }

    pub fn mem_type(&self) -> Result<EPTMemType, u8> {
        EPTFlags::from_bits_truncate(self.0).mem_type()
    }

    pub fn is_unused(&self) -> bool {
        self.0 == 0
    }

    pub fn is_present(&self) -> bool {
        self.0 & EPTFlags::FULL.bits() != 0 // RWX != 0
    }

    /// Whether read, write and execute are all granted.
    pub fn is_full_access(&self) -> bool {
        EPTFlags::from_bits_truncate(self.0).contains(EPTFlags::FULL)
    }

    pub fn clear(&mut self) {
        self.0 = 0
    }
}

impl fmt::Debug for EPTEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EPTEntry")
            .field("raw", &self.0)
            .field("hpaddr", &self.paddr())
            .field("flags", &self.flags())
            .field("mem_type", &self.mem_type())
            .finish()
    }
}
