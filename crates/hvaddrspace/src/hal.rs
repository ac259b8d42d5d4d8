use crate::{HostPhysAddr, HostVirtAddr};

/// The interfaces which the host's physical page allocator must implement.
///
/// Pages are reference counted by the allocator. A freshly allocated frame
/// carries no references; every holder (a [`PhysFrame`](crate::PhysFrame), an
/// EPT leaf, an EPT interior slot) takes exactly one with [`incref`](Self::incref)
/// and gives it back with [`decref`](Self::decref). The allocator reclaims the
/// frame when the count drops to zero.
pub trait PagingHal: Sized {
    /// Allocates one zero-filled 4K frame and returns its physical address.
    fn alloc_frame() -> Option<HostPhysAddr>;

    /// Converts a host physical address to the host virtual address it is mapped at.
    fn phys_to_virt(paddr: HostPhysAddr) -> HostVirtAddr;

    /// Converts a host virtual address to the corresponding host physical address.
    fn virt_to_phys(vaddr: HostVirtAddr) -> HostPhysAddr;

    /// Whether `paddr` lies in a frame that the allocator keeps a reference count for.
    fn is_tracked(paddr: HostPhysAddr) -> bool;

    /// Takes one reference on the frame containing `paddr`.
    fn incref(paddr: HostPhysAddr);

    /// Drops one reference on the frame containing `paddr`, reclaiming it at zero.
    fn decref(paddr: HostPhysAddr);
}
