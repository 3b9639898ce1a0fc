//! Runtime event log
//!
//! Every load, failed load, unload, enable and disable, plus the supervisor's
//! phase changes, is published here with a sequence number.

pub mod bus;
pub mod memory;
pub mod types;

pub use bus::{EventSeq, RuntimeEventBus};
pub use memory::MemoryEventBus;
pub use types::RuntimeEvent;
