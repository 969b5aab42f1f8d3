mod common;
mod records;

pub use common::probe_capabilities;
pub use records::SqliteRecordRepo;
