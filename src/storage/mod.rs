//! Store adapters.
//!
//! Every backing store is reached through [`StoreAdapter`]:
//! - `DrillStore`: Apache Drill REST endpoint (relational, document and
//!   file sources under one SQL dialect)
//! - `MemoryStore`: rows held in process, for tests and offline demos
//!
//! The dispatcher picks adapters by store identifier from an
//! [`AdapterRegistry`].

mod drill;
mod memory;
mod registry;
pub mod sql;
mod traits;

pub use drill::DrillStore;
pub use memory::MemoryStore;
pub use registry::AdapterRegistry;
pub use traits::*;
