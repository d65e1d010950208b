pub mod db;
pub mod memory;
pub mod payments;

pub use db::DbAdapter;
pub use memory::InMemoryDb;
pub use payments::{HttpPaymentAdapter, LoggingPaymentAdapter};
