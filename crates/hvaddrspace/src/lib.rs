//! Guest physical address space management for a thin VMX hypervisor.
//!
//! This crate contains:
//! - Distinct address types for the guest-physical, host-physical and
//!   host-virtual domains.
//! - [`PagingHal`]: the interface to the host's reference-counted physical page allocator.
//! - [`PhysFrame`]: an owned share of one physical page.
//! - [`ExtendedPageTable`]: the 4-level guest-physical to host-physical translation tree.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;
extern crate alloc;

mod frame;
mod hal;
mod npt;

use memory_addr::{def_usize_addr, def_usize_addr_formatter, PhysAddr, VirtAddr};

pub use frame::PhysFrame;
pub use hal::PagingHal;
pub use npt::{EPTEntry, EPTMemType, ExtendedPageTable, ENTRY_COUNT};

pub use memory_addr::{MemoryAddr, PAGE_SIZE_4K as PAGE_SIZE};
pub use page_table_entry::MappingFlags;

/// Host virtual address.
pub type HostVirtAddr = VirtAddr;
/// Host physical address.
pub type HostPhysAddr = PhysAddr;

def_usize_addr! {
    /// Guest physical address.
    pub type GuestPhysAddr;
}

def_usize_addr_formatter! {
    GuestPhysAddr = "GPA:{}";
}

/// Read, write and execute: the permission carried by every interior EPT entry
/// and by demand-allocated guest RAM.
pub const FULL_ACCESS: MappingFlags = MappingFlags::READ
    .union(MappingFlags::WRITE)
    .union(MappingFlags::EXECUTE);
