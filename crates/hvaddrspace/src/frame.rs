use core::marker::PhantomData;
use core::mem::ManuallyDrop;

use axerrno::{ax_err_type, AxResult};

use crate::{HostPhysAddr, MemoryAddr, PagingHal, PAGE_SIZE};

/// One share of a 4K-sized physical page. The share is given back to the
/// allocator on drop.
#[derive(Debug)]
pub struct PhysFrame<H: PagingHal> {
    start_paddr: HostPhysAddr,
    _phantom: PhantomData<H>,
}

impl<H: PagingHal> PhysFrame<H> {
    /// Allocates a zero-filled frame and takes the first reference on it.
    pub fn alloc_zero() -> AxResult<Self> {
        let start_paddr = H::alloc_frame()
            .ok_or_else(|| ax_err_type!(NoMemory, "allocate physical frame failed"))?;
        assert_ne!(start_paddr.as_usize(), 0);
        H::incref(start_paddr);
        trace!("allocated PhysFrame({:#x})", start_paddr);
        Ok(Self {
            start_paddr,
            _phantom: PhantomData,
        })
    }

    /// Takes an additional reference on an allocator-tracked frame.
    ///
    /// Returns `None` if `paddr` is not page aligned or not tracked.
    pub fn share(paddr: HostPhysAddr) -> Option<Self> {
        if !paddr.is_aligned_4k() || !H::is_tracked(paddr) {
            return None;
        }
        H::incref(paddr);
        Some(Self {
            start_paddr: paddr,
            _phantom: PhantomData,
        })
    }

    /// Gives up the handle without dropping its reference, e.g. to hand the
    /// share to an EPT slot. The returned address now carries that reference.
    pub fn into_raw(self) -> HostPhysAddr {
        ManuallyDrop::new(self).start_paddr
    }

    pub fn start_paddr(&self) -> HostPhysAddr {
        self.start_paddr
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        H::phys_to_virt(self.start_paddr).as_mut_ptr()
    }

    /// The frame's content seen through the host mapping.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the frame is alive while `self` holds a reference on it.
        unsafe { core::slice::from_raw_parts_mut(self.as_mut_ptr(), PAGE_SIZE) }
    }
}

impl<H: PagingHal> Drop for PhysFrame<H> {
    fn drop(&mut self) {
        H::decref(self.start_paddr);
        trace!("released PhysFrame({:#x})", self.start_paddr);
    }
}
