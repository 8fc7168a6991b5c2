//! Trust-store boundary for paired peer nodes.
//!
//! Discovery and the preboot service only ever see the canonical record types
//! defined here.
pub mod file_store;
pub mod records;

pub use file_store::*;
pub use records::*;
