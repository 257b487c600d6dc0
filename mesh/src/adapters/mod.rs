//! The transport adapters shipped with this crate (§4.4): one module
//! per medium class, plus the in-memory [`Link`](crate::adapter::Link)
//! used to exercise them without real hardware.

pub mod ble;
pub mod local_net;
pub mod lora;
pub mod memory_link;

pub use ble::BleAdapter;
pub use local_net::LocalNetAdapter;
pub use lora::{LoraAdapter, LoraConfig};
pub use memory_link::{MemoryLink, MemoryNetwork};
