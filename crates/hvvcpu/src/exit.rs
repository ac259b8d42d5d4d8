use crate::GeneralRegisters;

/// The width of a port I/O access.
///
/// Note that the term "word" here refers to 16-bit data, as in the x86 architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessWidth {
    Byte,
    Word,
    Dword,
    Qword,
}

impl AccessWidth {
    /// Mask selecting the low bits of a register covered by an access of this width.
    pub fn mask(self) -> u64 {
        match self {
            Self::Byte => 0xff,
            Self::Word => 0xffff,
            Self::Dword => 0xffff_ffff,
            Self::Qword => u64::MAX,
        }
    }
}

impl TryFrom<usize> for AccessWidth {
    type Error = ();

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Byte),
            2 => Ok(Self::Word),
            4 => Ok(Self::Dword),
            8 => Ok(Self::Qword),
            _ => Err(()),
        }
    }
}

impl From<AccessWidth> for usize {
    fn from(width: AccessWidth) -> usize {
        match width {
            AccessWidth::Byte => 1,
            AccessWidth::Word => 2,
            AccessWidth::Dword => 4,
            AccessWidth::Qword => 8,
        }
    }
}

/// Guest state captured by the VM-exit trampoline.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExitSnapshot {
    pub regs: GeneralRegisters,
    pub rip: u64,
}

impl ExitSnapshot {
    pub fn new(regs: GeneralRegisters, rip: u64) -> Self {
        Self { regs, rip }
    }
}
