pub mod db;
pub mod memory;

pub use db::PgRecordStore;
pub use memory::MemoryRecordStore;
