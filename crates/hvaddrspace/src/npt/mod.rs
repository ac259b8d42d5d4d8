mod ept;
mod table;

pub use self::ept::{EPTEntry, EPTMemType};
pub use self::table::{ExtendedPageTable, ENTRY_COUNT};
