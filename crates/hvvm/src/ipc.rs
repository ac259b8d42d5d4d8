//! The host's message-passing primitives, as seen by the hypercall bridge.

use hvaddrspace::HostPhysAddr;

/// Identity of a host process.
pub type ProcessId = i32;

/// Destination token a guest uses for the host file-system service.
pub const HOST_FS_ENV: ProcessId = 1;

/// Kinds of host services a guest can address without knowing their identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    FileSystem,
}

/// A message delivered by [`IpcTransport::recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IpcMessage {
    /// Zero on success, a negative error code otherwise.
    pub status: i32,
    pub from: ProcessId,
    pub value: u32,
    /// Permission of the transferred page, zero if none was transferred.
    pub perm: u32,
}

/// Host IPC, acting on behalf of the process that hosts the guest.
pub trait IpcTransport {
    /// Tries to send `value` and, optionally, the page at `page` with `perm`
    /// to `dest`. Returns zero or a negative error code.
    fn try_send(
        &mut self,
        dest: ProcessId,
        value: u32,
        page: Option<HostPhysAddr>,
        perm: u32,
    ) -> i32;

    /// Blocks until a message arrives. A transferred page is placed at `page`.
    fn recv(&mut self, page: Option<HostPhysAddr>) -> IpcMessage;
}

/// Finds the runtime identity of a host service.
pub trait ServiceResolver {
    fn resolve(&self, service: ServiceType) -> Option<ProcessId>;
}
