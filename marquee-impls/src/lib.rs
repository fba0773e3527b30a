mod bots;
mod transports;

pub use bots::*;
pub use transports::*;
