use core::marker::PhantomData;
use core::ops::Range;

use axerrno::{ax_err, AxError, AxResult};
use bit_field::BitField;
use page_table_entry::MappingFlags;

use super::ept::{EPTEntry, EPTMemType};
use crate::{
    GuestPhysAddr, HostPhysAddr, HostVirtAddr, MemoryAddr, PagingHal, PhysFrame, PAGE_SIZE,
};

/// Number of entries in one table page.
pub const ENTRY_COUNT: usize = 512;

/// PML4, PDPT, PD and PT.
const LEVELS: usize = 4;

type Table = [EPTEntry; ENTRY_COUNT];

/// Index into the table of `level` (0 = PT, 3 = PML4) for `gpa`.
fn table_index(gpa: usize, level: usize) -> usize {
    let shift = 12 + 9 * level;
    gpa.get_bits(shift..shift + 9)
}

/// # Safety
///
/// `paddr` must be the physical address of a live table page of this tree.
unsafe fn table_of<'a, H: PagingHal>(paddr: HostPhysAddr) -> &'a mut Table {
    &mut *(H::phys_to_virt(paddr).as_mut_ptr() as *mut Table)
}

/// The VMX extended page table. (SDM Vol. 3C, Section 29.3)
///
/// Only the root table is borrowed from the caller. Interior tables are
/// allocated on demand, each owned by the parent slot pointing at it, and are
/// released by [`free_all`](Self::free_all) together with the shares held by
/// the leaves.
pub struct ExtendedPageTable<H: PagingHal> {
    root_paddr: HostPhysAddr,
    _phantom: PhantomData<H>,
}

impl<H: PagingHal> ExtendedPageTable<H> {
    /// Wraps the zero-filled PML4 page at `root_paddr`, owned by the caller.
    pub fn from_root(root_paddr: HostPhysAddr) -> AxResult<Self> {
        if root_paddr.as_usize() == 0 || !root_paddr.is_aligned_4k() {
            return ax_err!(InvalidInput, "invalid EPT root");
        }
        Ok(Self {
            root_paddr,
            _phantom: PhantomData,
        })
    }

    pub fn root_paddr(&self) -> HostPhysAddr {
        self.root_paddr
    }

    /// The EPT pointer for the VMCS: write-back paging structures, 4-level walk.
    pub fn eptp(&self) -> u64 {
        const EPT_PAGE_WALK_LENGTH_4: u64 = 3 << 3;
        self.root_paddr.as_usize() as u64 | EPT_PAGE_WALK_LENGTH_4 | EPTMemType::WriteBack as u64
    }

    /// Finds the leaf entry for `gpa`.
    ///
    /// With `create`, the missing interior tables are allocated zero-filled
    /// and linked with full access. All of them are allocated before anything
    /// is linked, so a failed allocation leaves the tree untouched and gives
    /// every page allocated so far back to the allocator.
    pub fn lookup(&mut self, gpa: GuestPhysAddr, create: bool) -> AxResult<&mut EPTEntry> {
        let gpa = gpa.as_usize();
        let mut pending: [Option<PhysFrame<H>>; LEVELS - 1] = Default::default();
        let mut table = unsafe { table_of::<H>(self.root_paddr) };

        for level in (1..LEVELS).rev() {
            let entry = &mut table[table_index(gpa, level)];
            if !entry.is_present() {
                if !create {
                    return Err(AxError::NotFound);
                }
                if pending.iter().all(Option::is_none) {
                    // Every level below this one is missing as well.
                    for slot in pending.iter_mut().take(level) {
                        *slot = Some(PhysFrame::alloc_zero()?);
                    }
                }
                let frame = pending
                    .iter_mut()
                    .find_map(Option::take)
                    .ok_or(AxError::BadState)?;
                *entry = EPTEntry::new_table(frame.into_raw());
                trace!("EPT: new level-{} table at {:#x}", level - 1, entry.paddr());
            }
            table = unsafe { table_of::<H>(entry.paddr()) };
        }
        Ok(&mut table[table_index(gpa, 0)])
    }

    fn walk(&self, gpa: GuestPhysAddr) -> AxResult<&EPTEntry> {
        let gpa = gpa.as_usize();
        let mut table: &Table = unsafe { table_of::<H>(self.root_paddr) };
        for level in (1..LEVELS).rev() {
            let entry = &table[table_index(gpa, level)];
            if !entry.is_present() {
                return Err(AxError::NotFound);
            }
            table = unsafe { table_of::<H>(entry.paddr()) };
        }
        Ok(&table[table_index(gpa, 0)])
    }

    /// Translates `gpa` to the host physical address backing it.
    pub fn translate(&self, gpa: GuestPhysAddr) -> Option<HostPhysAddr> {
        let entry = self.walk(gpa).ok()?;
        if !entry.is_present() {
            return None;
        }
        Some(entry.paddr() + gpa.align_offset_4k())
    }

    /// The leaf entry for `gpa`, if every interior level exists.
    pub fn leaf_entry(&self, gpa: GuestPhysAddr) -> Option<EPTEntry> {
        self.walk(gpa).ok().copied()
    }

    /// Host virtual address at which the host can access guest memory at `gpa`.
    pub fn resolve_host_address(&self, gpa: GuestPhysAddr) -> Option<HostVirtAddr> {
        self.translate(gpa).map(H::phys_to_virt)
    }

    /// Maps the frame at `host_paddr` at `gpa` with `flags`.
    ///
    /// The tree takes over one reference on the frame, which the caller must
    /// already hold. A leaf that gets overwritten gives back the reference it
    /// held.
    pub fn map(
        &mut self,
        host_paddr: HostPhysAddr,
        gpa: GuestPhysAddr,
        flags: MappingFlags,
        overwrite: bool,
    ) -> AxResult {
        if !host_paddr.is_aligned_4k() || !H::is_tracked(host_paddr) {
            return ax_err!(InvalidInput, "host address is not an allocator-tracked frame");
        }
        if !gpa.is_aligned_4k() {
            return ax_err!(InvalidInput, "guest physical address is not page aligned");
        }

        let entry = self.lookup(gpa, true)?;
        if entry.is_present() {
            if !overwrite {
                warn!("EPT: {:?} is already mapped: {:?}", gpa, entry);
                return Err(AxError::InvalidInput);
            }
            H::decref(entry.paddr());
        }
        *entry = EPTEntry::new_page(host_paddr, flags);
        trace!("EPT: map {:?} -> {:#x} {:?}", gpa, host_paddr, flags);
        Ok(())
    }

    /// Maps `frame` at `gpa`, replacing any existing mapping. On success the
    /// tree holds its own reference on the frame, shared with `frame`.
    pub fn insert(&mut self, frame: &PhysFrame<H>, gpa: GuestPhysAddr, flags: MappingFlags) -> AxResult {
        let paddr = frame.start_paddr();
        H::incref(paddr);
        if let Err(err) = self.map(paddr, gpa, flags, true) {
            H::decref(paddr);
            return Err(err);
        }
        Ok(())
    }

    /// Backs every page of `range` that is not mapped yet with a fresh
    /// zero-filled frame.
    pub fn populate(&mut self, range: Range<GuestPhysAddr>, flags: MappingFlags) -> AxResult {
        debug!("EPT: populate [{:?}, {:?}) {:?}", range.start, range.end, flags);
        let mut gpa = range.start.align_down_4k();
        while gpa < range.end {
            if self.translate(gpa).is_none() {
                let frame = PhysFrame::<H>::alloc_zero()?;
                self.insert(&frame, gpa, flags)?;
            }
            gpa = gpa + PAGE_SIZE;
        }
        Ok(())
    }

    /// Releases every mapped frame and every interior table, bottom-up.
    ///
    /// The root table is left in place, emptied.
    pub fn free_all(&mut self) {
        debug!("EPT: releasing tree at {:#x}", self.root_paddr);
        Self::release_table(self.root_paddr, LEVELS - 1);
    }

    fn release_table(table_paddr: HostPhysAddr, level: usize) {
        let table = unsafe { table_of::<H>(table_paddr) };
        for entry in table.iter_mut().filter(|entry| entry.is_present()) {
            let paddr = entry.paddr();
            if level != 0 {
                Self::release_table(paddr, level - 1);
            }
            H::decref(paddr);
            entry.clear();
        }
    }
}
