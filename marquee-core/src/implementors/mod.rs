mod local_broadcaster;
mod memory_store;

pub use local_broadcaster::*;
pub use memory_store::*;
