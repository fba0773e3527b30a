mod id;
mod tokens;

pub use id::*;
pub use tokens::*;
