//! The Hypercall Bridge: services a guest's VMCALL by the request code in RAX.

use hvaddrspace::{GuestPhysAddr, PhysFrame, FULL_ACCESS};
use hvvcpu::{GeneralRegisters, VmxExitInfo};

use super::{ExitContext, HandlerResult, VmExitEffect};
use crate::config::HIGH_MEMORY_START;
use crate::ipc::{ProcessId, ServiceType, HOST_FS_ENV};
use crate::HvVmHal;

numeric_enum_macro::numeric_enum! {
    #[repr(u64)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Hypercall request codes, passed in RAX.
    pub enum HypercallCode {
        /// Multiboot memory map query. Returns the map's address in RBX.
        MbMap = 1,
        /// IPC send: destination in RDX, value in RCX, page in RBX,
        /// permission in RDI. Status in RAX.
        IpcSend = 2,
        /// IPC receive: receive page in RDX. Status in RAX; on success the
        /// sender in RDX, the value in RCX and the permission in RDI.
        IpcRecv = 3,
    }
}

/// Guest physical address the multiboot information is placed at.
pub const MULTIBOOT_MAP_GPA: usize = 0x6000;

/// `multiboot_info.flags`: `mmap_length` and `mmap_addr` are valid.
pub const MB_FLAG_MMAP: u32 = 1 << 6;
pub const MB_TYPE_USABLE: u32 = 1;
pub const MB_TYPE_RESERVED: u32 = 2;

/// Size of the multiboot information header.
pub const MULTIBOOT_INFO_SIZE: usize = 52;
/// Size of one memory map entry, including its leading `size` field.
pub const MEMORY_MAP_ENTRY_SIZE: usize = 24;

const MEMORY_MAP_LEN: usize = 3;
const MULTIBOOT_MAP_SIZE: usize = MULTIBOOT_INFO_SIZE + MEMORY_MAP_LEN * MEMORY_MAP_ENTRY_SIZE;

/// One multiboot memory map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMapEntry {
    pub base: u64,
    pub length: u64,
    pub ty: u32,
}

impl MemoryMapEntry {
    fn encode(&self, buf: &mut [u8]) {
        // `size` excludes the field itself.
        put_u32(buf, 0, (MEMORY_MAP_ENTRY_SIZE - 4) as u32);
        put_u32(buf, 4, self.base as u32);
        put_u32(buf, 8, (self.base >> 32) as u32);
        put_u32(buf, 12, self.length as u32);
        put_u32(buf, 16, (self.length >> 32) as u32);
        put_u32(buf, 20, self.ty);
    }
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Low memory, the legacy I/O hole and high memory up to `phys_sz`.
pub fn guest_memory_map(phys_sz: usize) -> [MemoryMapEntry; MEMORY_MAP_LEN] {
    const LOW_MEMORY_END: u64 = 0xA_0000;
    let high_start = HIGH_MEMORY_START as u64;
    [
        MemoryMapEntry {
            base: 0,
            length: LOW_MEMORY_END,
            ty: MB_TYPE_USABLE,
        },
        MemoryMapEntry {
            base: LOW_MEMORY_END,
            length: high_start - LOW_MEMORY_END,
            ty: MB_TYPE_RESERVED,
        },
        MemoryMapEntry {
            base: high_start,
            length: (phys_sz as u64).saturating_sub(high_start),
            ty: MB_TYPE_USABLE,
        },
    ]
}

/// The multiboot information header followed by the memory map, as the guest
/// finds it at [`MULTIBOOT_MAP_GPA`].
pub fn encode_multiboot_map(phys_sz: usize) -> [u8; MULTIBOOT_MAP_SIZE] {
    const FLAGS_OFFSET: usize = 0;
    const MMAP_LENGTH_OFFSET: usize = 44;
    const MMAP_ADDR_OFFSET: usize = 48;

    let mut buf = [0; MULTIBOOT_MAP_SIZE];
    put_u32(&mut buf, FLAGS_OFFSET, MB_FLAG_MMAP);
    put_u32(
        &mut buf,
        MMAP_LENGTH_OFFSET,
        (MEMORY_MAP_LEN * MEMORY_MAP_ENTRY_SIZE) as u32,
    );
    put_u32(
        &mut buf,
        MMAP_ADDR_OFFSET,
        (MULTIBOOT_MAP_GPA + MULTIBOOT_INFO_SIZE) as u32,
    );
    let entries = buf[MULTIBOOT_INFO_SIZE..].chunks_exact_mut(MEMORY_MAP_ENTRY_SIZE);
    for (entry, chunk) in guest_memory_map(phys_sz).iter().zip(entries) {
        entry.encode(chunk);
    }
    buf
}

pub(super) fn handle_vmcall<H: HvVmHal>(
    exit_info: &VmxExitInfo,
    regs: &GeneralRegisters,
    ctx: ExitContext<'_, H>,
) -> HandlerResult {
    let code = match HypercallCode::try_from(regs.rax) {
        Ok(code) => code,
        Err(code) => {
            warn!("VM exit: unknown hypercall {:#x}", code);
            return Ok(None);
        }
    };
    trace!("VM exit: hypercall {:?}", code);

    let mut regs = *regs;
    match code {
        HypercallCode::MbMap => {
            let mut frame = PhysFrame::<H::PagingHal>::alloc_zero()?;
            let map = encode_multiboot_map(ctx.config.phys_sz);
            frame.as_mut_slice()[..map.len()].copy_from_slice(&map);
            ctx.ept
                .insert(&frame, GuestPhysAddr::from(MULTIBOOT_MAP_GPA), FULL_ACCESS)?;
            regs.rbx = MULTIBOOT_MAP_GPA as u64;
        }
        HypercallCode::IpcSend => {
            let mut dest = regs.rdx as ProcessId;
            if dest == HOST_FS_ENV {
                match ctx.resolver.resolve(ServiceType::FileSystem) {
                    Some(fs) => dest = fs,
                    None => warn!("VM exit: no host file-system service, sending to {}", dest),
                }
            }
            let page = ctx.ept.translate(GuestPhysAddr::from(regs.rbx as usize));
            let status = ctx
                .ipc
                .try_send(dest, regs.rcx as u32, page, regs.rdi as u32);
            debug!("VM exit: IPC send to {} -> {}", dest, status);
            regs.rax = status as i64 as u64;
        }
        HypercallCode::IpcRecv => {
            let page = ctx.ept.translate(GuestPhysAddr::from(regs.rdx as usize));
            let msg = ctx.ipc.recv(page);
            debug!("VM exit: IPC receive -> {:?}", msg);
            regs.rax = msg.status as i64 as u64;
            if msg.status == 0 {
                regs.rdx = msg.from as u32 as u64;
                regs.rcx = msg.value as u64;
                regs.rdi = msg.perm as u64;
            }
        }
    }
    Ok(Some(VmExitEffect::advance(regs, exit_info)))
}
